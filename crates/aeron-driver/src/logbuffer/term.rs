// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Term buffer layout: three rotating partitions plus a metadata region.
//!
//! ```text
//! +----------------+----------------+----------------+--------------+
//! |   partition 0  |   partition 1  |   partition 2  |   metadata   |
//! +----------------+----------------+----------------+--------------+
//! ```
//!
//! Metadata layout (all fields are `AtomicI64`/`AtomicI32` read/written
//! through atomic accessors, never plain loads/stores, since the region is
//! shared across processes):
//!
//! ```text
//! offset 0   tail[0..3]            i64 x 3, byte offset within partition
//! offset 24  active_partition      i32, index of the currently active partition
//! offset 28  initial_term_id       i32
//! offset 32  active_term_id        i32, term id owned by the active partition
//! offset 36  mtu                   i32
//! offset 40  time_of_last_sm_ms    i64
//! offset 48  end_of_stream_position i64
//! offset 56  default_header        32 bytes, DATA header template
//! ```

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use super::mmap::MappedFile;
use crate::wire::data::DATA_HEADER_LENGTH;

/// Number of rotating partitions in a term buffer.
pub const PARTITION_COUNT: usize = 3;

const TAIL_OFFSETS: [usize; PARTITION_COUNT] = [0, 8, 16];
const ACTIVE_PARTITION_OFFSET: usize = 24;
const INITIAL_TERM_ID_OFFSET: usize = 28;
const ACTIVE_TERM_ID_OFFSET: usize = 32;
const MTU_OFFSET: usize = 36;
const TIME_OF_LAST_SM_OFFSET: usize = 40;
const END_OF_STREAM_POSITION_OFFSET: usize = 48;
const DEFAULT_HEADER_OFFSET: usize = 56;

/// Byte length of the metadata region trailing the three partitions.
pub const METADATA_LENGTH: usize = DEFAULT_HEADER_OFFSET + DATA_HEADER_LENGTH;

/// A committed-but-unconsumed frame's position has exceeded the
/// representable range. `i64::MAX` is reserved as a sentinel for "no
/// limit"; real positions never reach it.
pub const MAX_POSITION: i64 = i64::MAX - 1;

/// Read/write accessors over the metadata region trailing a term buffer's
/// three partitions. Every field is touched through an atomic so that the
/// Conductor, Sender, and Receiver (and, on the log-buffer files under
/// `aeronDir`, separate client processes) observe consistent values without
/// a lock.
pub struct TermMeta {
    base: *mut u8,
}

// SAFETY: every accessor goes through an atomic load/store at a fixed,
// aligned offset into the metadata region of a log buffer mapping; the
// region outlives `TermMeta` because `TermMeta` only ever borrows from a
// `LogBuffer` that owns the mapping.
unsafe impl Send for TermMeta {}
unsafe impl Sync for TermMeta {}

impl TermMeta {
    /// Wrap the metadata region starting at `base`. `base` must point to at
    /// least [`METADATA_LENGTH`] bytes, 8-byte aligned.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of [`METADATA_LENGTH`]
    /// bytes for as long as the returned `TermMeta` (and any clone of it) is
    /// alive, and must not alias a `TermMeta` built from a different base
    /// pointer over the same bytes without the atomics here providing the
    /// necessary synchronization.
    pub unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    fn atomic_i64(&self, offset: usize) -> &AtomicI64 {
        // SAFETY: offset is one of the fixed, 8-byte-aligned field offsets
        // declared above and within METADATA_LENGTH; base is valid per
        // Self::new's contract.
        unsafe { &*(self.base.add(offset).cast::<AtomicI64>()) }
    }

    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        // SAFETY: offset is one of the fixed, 4-byte-aligned field offsets
        // declared above and within METADATA_LENGTH; base is valid per
        // Self::new's contract.
        unsafe { &*(self.base.add(offset).cast::<AtomicI32>()) }
    }

    pub fn tail(&self, partition: usize) -> i64 {
        self.atomic_i64(TAIL_OFFSETS[partition]).load(Ordering::Acquire)
    }

    pub fn tail_atomic(&self, partition: usize) -> &AtomicI64 {
        self.atomic_i64(TAIL_OFFSETS[partition])
    }

    pub fn set_tail(&self, partition: usize, value: i64) {
        self.atomic_i64(TAIL_OFFSETS[partition]).store(value, Ordering::Release);
    }

    pub fn active_partition(&self) -> usize {
        self.atomic_i32(ACTIVE_PARTITION_OFFSET).load(Ordering::Acquire) as usize
    }

    pub fn set_active_partition(&self, index: usize) {
        self.atomic_i32(ACTIVE_PARTITION_OFFSET)
            .store(index as i32, Ordering::Release);
    }

    pub fn initial_term_id(&self) -> i32 {
        self.atomic_i32(INITIAL_TERM_ID_OFFSET).load(Ordering::Relaxed)
    }

    pub fn set_initial_term_id(&self, term_id: i32) {
        self.atomic_i32(INITIAL_TERM_ID_OFFSET).store(term_id, Ordering::Relaxed);
    }

    pub fn active_term_id(&self) -> i32 {
        self.atomic_i32(ACTIVE_TERM_ID_OFFSET).load(Ordering::Acquire)
    }

    pub fn set_active_term_id(&self, term_id: i32) {
        self.atomic_i32(ACTIVE_TERM_ID_OFFSET).store(term_id, Ordering::Release);
    }

    pub fn mtu(&self) -> i32 {
        self.atomic_i32(MTU_OFFSET).load(Ordering::Relaxed)
    }

    pub fn set_mtu(&self, mtu: i32) {
        self.atomic_i32(MTU_OFFSET).store(mtu, Ordering::Relaxed);
    }

    pub fn time_of_last_sm_ms(&self) -> i64 {
        self.atomic_i64(TIME_OF_LAST_SM_OFFSET).load(Ordering::Relaxed)
    }

    pub fn set_time_of_last_sm_ms(&self, value: i64) {
        self.atomic_i64(TIME_OF_LAST_SM_OFFSET).store(value, Ordering::Relaxed);
    }

    pub fn end_of_stream_position(&self) -> i64 {
        self.atomic_i64(END_OF_STREAM_POSITION_OFFSET).load(Ordering::Acquire)
    }

    pub fn set_end_of_stream_position(&self, position: i64) {
        self.atomic_i64(END_OF_STREAM_POSITION_OFFSET).store(position, Ordering::Release);
    }

    /// The 32-byte DATA header template new frames are stamped from
    /// (session-id/stream-id/initial-term-id prefilled by the Conductor).
    pub fn default_header(&self) -> &[u8] {
        // SAFETY: DEFAULT_HEADER_OFFSET..+DATA_HEADER_LENGTH is within
        // METADATA_LENGTH and base is valid per Self::new's contract.
        unsafe {
            std::slice::from_raw_parts(self.base.add(DEFAULT_HEADER_OFFSET), DATA_HEADER_LENGTH)
        }
    }

    pub fn default_header_mut(&self) -> &mut [u8] {
        // SAFETY: see default_header; exclusive access is the caller's
        // responsibility (only the Conductor writes this, once, at
        // creation time, before any other agent maps the file).
        unsafe {
            std::slice::from_raw_parts_mut(
                self.base.add(DEFAULT_HEADER_OFFSET),
                DATA_HEADER_LENGTH,
            )
        }
    }
}

/// Compute the monotonic position for `(term_id, term_offset)` given the
/// stream's initial term id and term length.
#[must_use]
pub fn position(
    initial_term_id: i32,
    term_length: i32,
    term_id: i32,
    term_offset: i32,
) -> i64 {
    let term_count = i64::from(term_id.wrapping_sub(initial_term_id));
    term_count * i64::from(term_length) + i64::from(term_offset)
}

/// Inverse of [`position`]: recover `(term_id, term_offset)`.
#[must_use]
pub fn term_id_and_offset(
    initial_term_id: i32,
    term_length: i32,
    position: i64,
) -> (i32, i32) {
    let term_length = i64::from(term_length);
    let term_count = position.div_euclid(term_length);
    let offset = position.rem_euclid(term_length);
    (
        initial_term_id.wrapping_add(term_count as i32),
        offset as i32,
    )
}

/// A log buffer: a memory-mapped file holding [`PARTITION_COUNT`]
/// partitions of `term_length` bytes each, plus a [`METADATA_LENGTH`]-byte
/// metadata region.
pub struct LogBuffer {
    mapping: MappedFile,
    term_length: usize,
}

impl LogBuffer {
    /// Wrap an already-mapped file whose length is
    /// `PARTITION_COUNT * term_length + METADATA_LENGTH`.
    #[must_use]
    pub fn new(mapping: MappedFile, term_length: usize) -> Self {
        debug_assert_eq!(
            mapping.len(),
            PARTITION_COUNT * term_length + METADATA_LENGTH
        );
        Self { mapping, term_length }
    }

    #[must_use]
    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// Byte slice over one partition.
    #[must_use]
    pub fn partition(&self, index: usize) -> &[u8] {
        let start = index * self.term_length;
        // SAFETY: start..start+term_length is within the mapping's bounds
        // by construction (Self::new's debug_assert), and callers
        // synchronize via the atomic frame-length/tail fields this module
        // and `appender`/`rebuild` define.
        unsafe { &self.mapping.as_slice()[start..start + self.term_length] }
    }

    /// Mutable byte slice over one partition.
    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub fn partition_mut(&self, index: usize) -> &mut [u8] {
        let start = index * self.term_length;
        // SAFETY: see Self::partition.
        unsafe { &mut self.mapping.as_mut_slice()[start..start + self.term_length] }
    }

    /// The metadata region trailing the partitions.
    #[must_use]
    pub fn meta(&self) -> TermMeta {
        let offset = PARTITION_COUNT * self.term_length;
        // SAFETY: offset..+METADATA_LENGTH is within the mapping's bounds
        // by construction; TermMeta's internal synchronization covers
        // concurrent access from other agents/processes.
        unsafe { TermMeta::new(self.mapping.as_mut_slice()[offset..].as_mut_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_round_trips_through_term_id_and_offset() {
        let initial_term_id = 42;
        let term_length = 65_536;

        for (term_id, offset) in [(42, 0), (42, 32), (43, 0), (45, 1024)] {
            let pos = position(initial_term_id, term_length, term_id, offset);
            assert_eq!(
                term_id_and_offset(initial_term_id, term_length, pos),
                (term_id, offset)
            );
        }
    }

    #[test]
    fn meta_round_trips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let term_length = 65_536usize;
        let total = PARTITION_COUNT * term_length + METADATA_LENGTH;
        let mapping = MappedFile::create(&dir.path().join("term.logbuffer"), total).unwrap();
        let log = LogBuffer::new(mapping, term_length);
        let meta = log.meta();

        meta.set_tail(0, 128);
        meta.set_active_partition(1);
        meta.set_initial_term_id(7);
        meta.set_active_term_id(7);
        meta.set_mtu(1408);
        meta.set_time_of_last_sm_ms(1_000);
        meta.set_end_of_stream_position(i64::MAX - 1);

        assert_eq!(meta.tail(0), 128);
        assert_eq!(meta.active_partition(), 1);
        assert_eq!(meta.initial_term_id(), 7);
        assert_eq!(meta.active_term_id(), 7);
        assert_eq!(meta.mtu(), 1408);
        assert_eq!(meta.time_of_last_sm_ms(), 1_000);
        assert_eq!(meta.end_of_stream_position(), i64::MAX - 1);
    }
}
