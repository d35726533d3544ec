// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Receiver-side term rebuild: write an inbound DATA/PAD frame into its
//! partition slot, respecting the heartbeat-never-overwrites-data rule.

use crate::error::Result;
use crate::wire::data::{DataView, DataViewMut, DATA_HEADER_LENGTH};
use crate::wire::header::HeaderView;

use super::term::LogBuffer;

/// Write `frame` (a complete DATA/PAD frame, header included) into
/// `partition_index` at `offset`.
///
/// A slot is empty when its stored `frame_length` is zero. Data always
/// overwrites a heartbeat (zero-length DATA) occupying the same slot;
/// heartbeats never overwrite anything already there. Returns `true` if the
/// frame was written.
pub fn rebuild(log: &LogBuffer, partition_index: usize, offset: usize, frame: &[u8]) -> Result<bool> {
    let incoming = DataView::new(frame)?;
    let partition = log.partition_mut(partition_index);
    let slot_len = frame.len().max(DATA_HEADER_LENGTH);
    if offset + slot_len > partition.len() {
        return Ok(false);
    }

    let existing_frame_length = HeaderView::new(&partition[offset..])?.frame_length();
    let slot_is_empty = existing_frame_length == 0;
    let slot_is_heartbeat = existing_frame_length as usize == DATA_HEADER_LENGTH;

    if !slot_is_empty && !(slot_is_heartbeat && !incoming.is_heartbeat()) {
        // Either already holds an equal-or-longer frame, or the incoming
        // frame is itself a heartbeat that must never clobber real data.
        return Ok(false);
    }

    let dest = &mut partition[offset..offset + frame.len()];
    dest.copy_from_slice(&frame[..DATA_HEADER_LENGTH]);
    dest[DATA_HEADER_LENGTH..].copy_from_slice(&frame[DATA_HEADER_LENGTH..]);

    // The header copy above already carries the correct frame-length, but
    // route the commit through DataViewMut so the release-ordering
    // convention at this call site matches the appender's.
    let mut view = DataViewMut::new(dest)?;
    view.commit(incoming.frame_length());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuffer::mmap::MappedFile;
    use crate::logbuffer::term::{METADATA_LENGTH, PARTITION_COUNT};
    use crate::wire::{FrameType, UNFRAGMENTED};

    fn new_log(term_length: usize) -> LogBuffer {
        let dir = tempfile::tempdir().unwrap();
        let total = PARTITION_COUNT * term_length + METADATA_LENGTH;
        let mapping = MappedFile::create(&dir.path().join("test.logbuffer"), total).unwrap();
        LogBuffer::new(mapping, term_length)
    }

    fn data_frame(term_offset: i32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; DATA_HEADER_LENGTH + payload.len()];
        let mut view = DataViewMut::new(&mut buf).unwrap();
        view.put_header(UNFRAGMENTED, FrameType::Data, term_offset, 1, 1, 1, 0);
        buf[DATA_HEADER_LENGTH..].copy_from_slice(payload);
        view.commit(buf.len() as i32);
        buf
    }

    fn heartbeat_frame(term_offset: i32) -> Vec<u8> {
        let mut buf = vec![0u8; DATA_HEADER_LENGTH];
        let mut view = DataViewMut::new(&mut buf).unwrap();
        view.put_header(UNFRAGMENTED, FrameType::Data, term_offset, 1, 1, 1, 0);
        view.commit(DATA_HEADER_LENGTH as i32);
        buf
    }

    #[test]
    fn writes_into_an_empty_slot() {
        let log = new_log(65_536);
        let frame = data_frame(0, b"hello");
        assert!(rebuild(&log, 0, 0, &frame).unwrap());
        assert_eq!(&log.partition(0)[..frame.len()], frame.as_slice());
    }

    #[test]
    fn data_overwrites_a_heartbeat_at_the_same_offset() {
        let log = new_log(65_536);
        let hb = heartbeat_frame(0);
        assert!(rebuild(&log, 0, 0, &hb).unwrap());

        let data = data_frame(0, b"hello");
        assert!(rebuild(&log, 0, 0, &data).unwrap());
        assert_eq!(
            HeaderView::new(&log.partition(0)[0..]).unwrap().frame_length() as usize,
            data.len()
        );
    }

    #[test]
    fn heartbeat_never_overwrites_committed_data() {
        let log = new_log(65_536);
        let data = data_frame(0, b"hello");
        assert!(rebuild(&log, 0, 0, &data).unwrap());

        let hb = heartbeat_frame(0);
        assert!(!rebuild(&log, 0, 0, &hb).unwrap());
        assert_eq!(
            HeaderView::new(&log.partition(0)[0..]).unwrap().frame_length() as usize,
            data.len()
        );
    }

    #[test]
    fn duplicate_data_frame_is_not_rewritten() {
        let log = new_log(65_536);
        let data = data_frame(0, b"hello");
        assert!(rebuild(&log, 0, 0, &data).unwrap());
        assert!(!rebuild(&log, 0, 0, &data).unwrap());
    }
}
