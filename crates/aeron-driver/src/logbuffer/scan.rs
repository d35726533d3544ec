// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Gap and block scanning over a rebuilt (receiver-side) or committed
//! (sender-side) partition.

use crate::wire::{align, header::HeaderView};

use super::term::LogBuffer;

/// A missing range found by [`scan_for_gap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub term_id: i32,
    pub term_offset: i32,
    pub length: i32,
}

/// Scan forward from `from_offset` in `partition_index` while frames are
/// committed (`frame_length != 0`). Stops at the first gap - a zero-length
/// slot followed, within `high_water_mark`, by a later committed slot - and
/// reports it. Returns `None` if no gap is found before `high_water_mark`.
///
/// A zero-length region that extends *to* `high_water_mark` (nothing
/// committed after it yet) is not a gap: the sender simply hasn't reached
/// there.
#[must_use]
pub fn scan_for_gap(
    log: &LogBuffer,
    partition_index: usize,
    term_id: i32,
    from_offset: i32,
    high_water_mark: i32,
) -> Option<Gap> {
    let partition = log.partition(partition_index);
    let mut offset = from_offset;

    while offset < high_water_mark {
        let frame_length = HeaderView::new(&partition[offset as usize..]).ok()?.frame_length();
        if frame_length == 0 {
            // Candidate gap start; look ahead for a later committed frame
            // within the high-water mark.
            let mut probe = offset + crate::wire::FRAME_ALIGNMENT as i32;
            while probe < high_water_mark {
                let probe_len = HeaderView::new(&partition[probe as usize..]).ok()?.frame_length();
                if probe_len != 0 {
                    return Some(Gap {
                        term_id,
                        term_offset: offset,
                        length: probe - offset,
                    });
                }
                probe += crate::wire::FRAME_ALIGNMENT as i32;
            }
            return None;
        }
        offset += align(frame_length as usize) as i32;
    }
    None
}

/// Consume contiguous committed frames (DATA and PAD alike) starting at
/// `from_offset`, up to `limit` bytes, without splitting a frame in two.
/// Returns the offset just past the last complete frame consumed.
#[must_use]
pub fn scan_block(log: &LogBuffer, partition_index: usize, from_offset: i32, limit: i32) -> i32 {
    let partition = log.partition(partition_index);
    let mut offset = from_offset;
    let end = from_offset + limit;

    while offset < end {
        let Ok(header) = HeaderView::new(&partition[offset as usize..]) else {
            break;
        };
        let frame_length = header.frame_length();
        if frame_length == 0 {
            break;
        }
        let aligned = align(frame_length as usize) as i32;
        if offset + aligned > end {
            break;
        }
        offset += aligned;
    }
    offset
}
