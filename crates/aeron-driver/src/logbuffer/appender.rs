// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Producer-side term append: reservation, fragmentation, and commit.

use std::sync::atomic::Ordering;

use super::term::{position, LogBuffer, MAX_POSITION, PARTITION_COUNT};
use crate::error::{Error, Result};
use crate::wire::data::{DataViewMut, DATA_HEADER_LENGTH};
use crate::wire::{align, FrameType, BEGIN_FLAG, END_FLAG, UNFRAGMENTED};

/// Outcome of a single [`Appender::append`] call, matching the non-blocking
/// return codes named in SPEC_FULL §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendResult {
    /// Reserved, written, and committed up to the returned new position.
    Success(i64),
    /// The reservation would advance past `sender_position_limit`.
    BackPressured,
    /// The active term just rotated; retry the append.
    AdminAction,
    /// `MAX_POSITION` would be exceeded.
    MaxPositionExceeded,
}

/// Borrows a [`LogBuffer`] to perform producer-side appends. Stateless
/// beyond what it borrows: every reservation goes through the log buffer's
/// own atomics, so multiple `Appender`s over the same buffer from different
/// threads would still be safe, though a publication only ever drives one.
pub struct Appender<'a> {
    log: &'a LogBuffer,
    initial_term_id: i32,
    session_id: i32,
    stream_id: i32,
}

impl<'a> Appender<'a> {
    #[must_use]
    pub fn new(log: &'a LogBuffer, initial_term_id: i32, session_id: i32, stream_id: i32) -> Self {
        Self {
            log,
            initial_term_id,
            session_id,
            stream_id,
        }
    }

    /// Append `payload`, fragmenting into `mtu`-bounded DATA frames if
    /// necessary, honoring `sender_position_limit`. A zero-length `payload`
    /// still reserves and commits a single (heartbeat-shaped) frame, but
    /// callers on the hot path should prefer `Sender`'s dedicated heartbeat
    /// path instead of appending empty messages.
    pub fn append(&self, payload: &[u8], mtu: usize, sender_position_limit: i64) -> Result<AppendResult> {
        let max_payload_per_frame = mtu.saturating_sub(DATA_HEADER_LENGTH);
        if max_payload_per_frame == 0 {
            return Err(Error::Generic("mtu too small for a DATA header".into()));
        }

        if payload.is_empty() {
            return self.append_fragment(payload, UNFRAGMENTED, sender_position_limit);
        }

        let mut offset = 0usize;
        let mut last = AppendResult::BackPressured;
        while offset < payload.len() {
            let end = (offset + max_payload_per_frame).min(payload.len());
            let mut flags = 0u8;
            if offset == 0 {
                flags |= BEGIN_FLAG;
            }
            if end == payload.len() {
                flags |= END_FLAG;
            }
            last = self.append_fragment(&payload[offset..end], flags, sender_position_limit)?;
            if !matches!(last, AppendResult::Success(_)) {
                return Ok(last);
            }
            offset = end;
        }
        Ok(last)
    }

    fn append_fragment(
        &self,
        fragment: &[u8],
        flags: u8,
        sender_position_limit: i64,
    ) -> Result<AppendResult> {
        let frame_length = DATA_HEADER_LENGTH + fragment.len();
        let aligned_len = align(frame_length) as i64;
        let term_length = self.log.term_length() as i64;
        let meta = self.log.meta();

        let active_partition = meta.active_partition();
        let active_term_id = meta.active_term_id();
        let tail = meta.tail_atomic(active_partition);

        // Check the limit against the tail we would claim *before* claiming
        // it via CAS, rather than unconditionally `fetch_add`-ing and
        // abandoning the reservation as padding afterwards - a rejected
        // offer must not consume term space.
        let mut reserved = tail.load(Ordering::Acquire);
        let (reserved, _reserved_end, new_position) = loop {
            let reserved_end = reserved + aligned_len;

            if reserved_end > term_length {
                match tail.compare_exchange(reserved, reserved_end, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => {
                        // Crossed the partition boundary: pad the remainder
                        // (if any room was left), rotate, and ask the
                        // caller to retry.
                        if reserved < term_length {
                            self.write_padding(active_partition, reserved, active_term_id, term_length);
                        }
                        if reserved <= term_length {
                            self.rotate(active_partition, active_term_id);
                        }
                        return Ok(AppendResult::AdminAction);
                    }
                    Err(actual) => {
                        reserved = actual;
                        continue;
                    }
                }
            }

            let new_position =
                position(self.initial_term_id, term_length as i32, active_term_id, reserved_end as i32);
            if new_position >= MAX_POSITION {
                return Ok(AppendResult::MaxPositionExceeded);
            }
            if new_position > sender_position_limit {
                return Ok(AppendResult::BackPressured);
            }

            match tail.compare_exchange(reserved, reserved_end, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break (reserved, reserved_end, new_position),
                Err(actual) => {
                    reserved = actual;
                    continue;
                }
            }
        };

        let partition = self.log.partition_mut(active_partition);
        let mut view = DataViewMut::new(&mut partition[reserved as usize..reserved as usize + frame_length])
            .map_err(|_| Error::Generic("appender buffer slice too small".into()))?;
        view.put_header(
            flags,
            FrameType::Data,
            reserved as i32,
            self.session_id,
            self.stream_id,
            active_term_id,
            0,
        );
        view.commit(frame_length as i32);

        Ok(AppendResult::Success(new_position))
    }

    /// Reclaim `[offset, offset + len)` in `partition_index` as a padding
    /// frame, overwriting whatever partial reservation sits there. Used to
    /// recover a producer that reserved space (advanced the partition's
    /// tail counter) and then stalled before writing/committing the
    /// frame - the `PUBLICATION_UNBLOCK_TIMEOUT` path. The session/stream
    /// ids in the forced padding header are irrelevant to any reader:
    /// gap/block scans only look at `frame_length`.
    pub fn force_unblock(&self, partition_index: usize, offset: i32, len: i32, term_id: i32) {
        self.write_padding_at(partition_index, offset as usize, len as usize, term_id);
    }

    fn write_padding(&self, partition_index: usize, offset: i64, term_id: i32, term_length: i64) {
        let pad_len = (term_length - offset) as usize;
        self.write_padding_at(partition_index, offset as usize, pad_len, term_id);
    }

    fn write_padding_at(&self, partition_index: usize, offset: usize, len: usize, term_id: i32) {
        if len < DATA_HEADER_LENGTH {
            return;
        }
        let partition = self.log.partition_mut(partition_index);
        let Ok(mut view) = DataViewMut::new(&mut partition[offset..offset + len]) else {
            return;
        };
        view.put_header(0, FrameType::Pad, offset as i32, self.session_id, self.stream_id, term_id, 0);
        view.commit(len as i32);
    }

    /// Scrub the next partition and advance the active index/term id. A
    /// partition is always cleared before it becomes active again (the
    /// "post-rotation scrubbing" invariant).
    fn rotate(&self, active_partition: usize, active_term_id: i32) {
        let next_partition = (active_partition + 1) % PARTITION_COUNT;
        let meta = self.log.meta();

        // Only the producer that actually crossed the boundary performs
        // the rotation; detect and skip if another fragment already did.
        if meta.active_partition() != active_partition {
            return;
        }

        self.log.partition_mut(next_partition).fill(0);
        meta.set_tail(next_partition, 0);
        meta.set_active_term_id(active_term_id.wrapping_add(1));
        meta.set_active_partition(next_partition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::mmap::MappedFile;
    use crate::logbuffer::term::METADATA_LENGTH;

    fn new_log(term_length: usize) -> LogBuffer {
        let dir = tempfile::tempdir().unwrap();
        let total = PARTITION_COUNT * term_length + METADATA_LENGTH;
        let mapping = MappedFile::create(&dir.path().join("test.logbuffer"), total).unwrap();
        let log = LogBuffer::new(mapping, term_length);
        log.meta().set_initial_term_id(100);
        log.meta().set_active_term_id(100);
        log.meta().set_active_partition(0);
        log
    }

    #[test]
    fn appends_a_single_unfragmented_message() {
        let log = new_log(65_536);
        let appender = Appender::new(&log, 100, 7, 10);

        let result = appender.append(b"Hello World! ", 1408, i64::MAX).unwrap();
        assert_eq!(result, AppendResult::Success(align(DATA_HEADER_LENGTH + 13) as i64));
    }

    #[test]
    fn back_pressure_blocks_append_past_limit() {
        let log = new_log(65_536);
        let appender = Appender::new(&log, 100, 7, 10);

        let first = appender.append(b"12345678901234567890123456789012", 1408, 64).unwrap();
        assert!(matches!(first, AppendResult::Success(_)));

        let second = appender.append(b"more", 1408, 64).unwrap();
        assert_eq!(second, AppendResult::BackPressured);
    }

    #[test]
    fn repeated_back_pressured_offers_do_not_consume_term_space() {
        let log = new_log(65_536);
        let appender = Appender::new(&log, 100, 7, 10);

        let tail_before = log.meta().tail(log.meta().active_partition());
        for _ in 0..10 {
            let result = appender.append(b"more", 1408, 0).unwrap();
            assert_eq!(result, AppendResult::BackPressured);
        }
        let tail_after = log.meta().tail(log.meta().active_partition());
        assert_eq!(tail_before, tail_after);
    }

    #[test]
    fn fragments_a_message_larger_than_the_mtu() {
        let log = new_log(65_536);
        let appender = Appender::new(&log, 100, 7, 10);

        let payload = vec![0xABu8; 3000];
        let mtu = 1408;
        let result = appender.append(&payload, mtu, i64::MAX).unwrap();
        assert!(matches!(result, AppendResult::Success(_)));

        let max_payload_per_frame = mtu - DATA_HEADER_LENGTH;
        let fragment_count = payload.len().div_ceil(max_payload_per_frame);
        let mut offset = 0usize;
        let mut frames_seen = 0;
        while offset < log.term_length() {
            let frame_len = crate::wire::header::HeaderView::new(&log.partition(0)[offset..])
                .unwrap()
                .frame_length();
            if frame_len == 0 {
                break;
            }
            frames_seen += 1;
            offset += align(frame_len as usize);
        }
        assert_eq!(frames_seen, fragment_count);
    }

    #[test]
    fn zero_length_payload_still_commits_a_heartbeat_shaped_frame() {
        let log = new_log(65_536);
        let appender = Appender::new(&log, 100, 7, 10);
        let result = appender.append(&[], 1408, i64::MAX).unwrap();
        assert_eq!(result, AppendResult::Success(align(DATA_HEADER_LENGTH) as i64));
    }
}
