// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Memory-mapped log buffers: the append-only per-(session, stream) stream
//! storage shared between a publication's producer and every subscriber's
//! rebuilder, plus the free functions that operate on them.

pub mod appender;
pub mod mmap;
pub mod rebuild;
pub mod scan;
pub mod term;

pub use appender::{AppendResult, Appender};
pub use scan::{scan_block, scan_for_gap, Gap};
pub use term::{position, term_id_and_offset, LogBuffer, PARTITION_COUNT};

use std::path::Path;

use crate::error::Result;
use mmap::MappedFile;
use term::METADATA_LENGTH;

/// Create a new log buffer file at `path` sized for `term_length`, stamp its
/// metadata, and return it mapped.
pub fn create_log(path: &Path, term_length: u32, initial_term_id: i32, mtu: u32) -> Result<LogBuffer> {
    let total = PARTITION_COUNT * term_length as usize + METADATA_LENGTH;
    let mapping = MappedFile::create(path, total)?;
    let log = LogBuffer::new(mapping, term_length as usize);

    let meta = log.meta();
    meta.set_initial_term_id(initial_term_id);
    meta.set_active_term_id(initial_term_id);
    meta.set_active_partition(0);
    meta.set_mtu(mtu as i32);
    meta.set_time_of_last_sm_ms(0);
    meta.set_end_of_stream_position(term::MAX_POSITION);

    Ok(log)
}

/// Open an already-created log buffer file at `path`.
pub fn open_log(path: &Path, term_length: u32) -> Result<LogBuffer> {
    let total = PARTITION_COUNT * term_length as usize + METADATA_LENGTH;
    let mapping = MappedFile::open(path, total)?;
    Ok(LogBuffer::new(mapping, term_length as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_round_trips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.logbuffer");

        let created = create_log(&path, 65_536, 42, 1408).unwrap();
        assert_eq!(created.meta().initial_term_id(), 42);
        drop(created);

        let opened = open_log(&path, 65_536).unwrap();
        assert_eq!(opened.meta().initial_term_id(), 42);
        assert_eq!(opened.meta().mtu(), 1408);
    }
}
