// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Control-and-Command (CnC) file: the metadata header and command rings a
//! client bootstraps against. Only the driver-side pieces are built here -
//! the client library itself is out of scope (SPEC_FULL §1).
//!
//! File layout: `{metaHeader, toDriverRing, toClientsRing, counterLabels,
//! counterValues}`.

pub mod messages;
pub mod ring;

pub use messages::{ClientCommand, DriverResponse};
pub use ring::Ring;

use std::sync::atomic::{AtomicI64, Ordering};

use crate::logbuffer::mmap::MappedFile;

/// Fixed header fields preceding the two rings.
const CNC_VERSION_OFFSET: usize = 0;
const TO_DRIVER_RING_LENGTH_OFFSET: usize = 4;
const TO_CLIENTS_RING_LENGTH_OFFSET: usize = 8;
const DRIVER_LIVENESS_OFFSET: usize = 16;
pub const CNC_VERSION: i32 = 1;
pub const META_HEADER_LENGTH: usize = 64;

/// The CnC file: metadata header plus the to-driver and to-clients rings.
/// Counter labels/values are outside this exercise's scope beyond the
/// header fields that would size them.
pub struct Cnc {
    mapping: MappedFile,
    to_driver_ring_length: usize,
}

impl Cnc {
    /// Create a new CnC file at `path`, sized for two rings of
    /// `ring_capacity` bytes each (plus their headers).
    pub fn create(path: &std::path::Path, ring_capacity: usize) -> crate::error::Result<Self> {
        let ring_total = ring::header_length() + ring_capacity;
        let total = META_HEADER_LENGTH + 2 * ring_total;
        let mapping = MappedFile::create(path, total)?;

        // SAFETY: single writer at creation time, before any other mapper
        // of this file exists.
        let base = mapping.as_ptr();
        unsafe {
            *(base.add(CNC_VERSION_OFFSET).cast::<i32>()) = CNC_VERSION;
            *(base.add(TO_DRIVER_RING_LENGTH_OFFSET).cast::<i32>()) = ring_capacity as i32;
            *(base.add(TO_CLIENTS_RING_LENGTH_OFFSET).cast::<i32>()) = ring_capacity as i32;
        }
        let cnc = Self { mapping, to_driver_ring_length: ring_capacity };
        cnc.liveness().store(0, Ordering::Release);
        Ok(cnc)
    }

    pub fn open(path: &std::path::Path, ring_capacity: usize) -> crate::error::Result<Self> {
        let ring_total = ring::header_length() + ring_capacity;
        let total = META_HEADER_LENGTH + 2 * ring_total;
        let mapping = MappedFile::open(path, total)?;
        Ok(Self { mapping, to_driver_ring_length: ring_capacity })
    }

    fn liveness(&self) -> &AtomicI64 {
        // SAFETY: DRIVER_LIVENESS_OFFSET is within META_HEADER_LENGTH and
        // 8-byte aligned; mapping is valid for the struct's lifetime.
        unsafe { &*(self.mapping.as_ptr().add(DRIVER_LIVENESS_OFFSET).cast::<AtomicI64>()) }
    }

    /// Stamp the liveness counter with the current epoch millis, so a
    /// freshly-started driver can detect a prior instance in the same
    /// directory via staleness.
    pub fn heartbeat(&self, now_ms: i64) {
        self.liveness().store(now_ms, Ordering::Release);
    }

    /// Whether a previous driver's liveness counter is still fresh (has
    /// been updated within `timeout_ms` of `now_ms`).
    #[must_use]
    pub fn is_active(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms - self.liveness().load(Ordering::Acquire) < timeout_ms
    }

    /// The ring a client writes commands into and the driver drains.
    #[must_use]
    pub fn to_driver_ring(&self) -> Ring {
        // SAFETY: offset/length computed from the header this type wrote
        // (or validated against, on open); mapping outlives the Ring since
        // it only ever borrows from Self.
        unsafe {
            Ring::new(
                self.mapping.as_ptr().add(META_HEADER_LENGTH),
                self.to_driver_ring_length,
            )
        }
    }

    /// The ring the driver writes responses into and a client drains.
    #[must_use]
    pub fn to_clients_ring(&self) -> Ring {
        let to_driver_total = ring::header_length() + self.to_driver_ring_length;
        // SAFETY: see to_driver_ring.
        unsafe {
            Ring::new(
                self.mapping.as_ptr().add(META_HEADER_LENGTH + to_driver_total),
                self.to_driver_ring_length,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_preserves_version_and_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cnc.dat");
        let cnc = Cnc::create(&path, 1024).unwrap();
        cnc.heartbeat(1_000);
        assert!(cnc.is_active(1_500, 10_000));
        assert!(!cnc.is_active(20_000, 10_000));
        drop(cnc);

        let reopened = Cnc::open(&path, 1024).unwrap();
        assert!(reopened.is_active(1_500, 10_000));
    }

    #[test]
    fn to_driver_and_to_clients_rings_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let cnc = Cnc::create(&dir.path().join("cnc.dat"), 512).unwrap();

        let cmd = ClientCommand::ClientKeepalive { client_id: 7 };
        assert!(cnc.to_driver_ring().write(&cmd.encode()));

        let mut drained = Vec::new();
        cnc.to_clients_ring().drain(|_| drained.push(()));
        assert!(drained.is_empty());

        let mut seen = Vec::new();
        cnc.to_driver_ring().drain(|payload| seen.push(ClientCommand::decode(payload)));
        assert_eq!(seen, vec![Some(cmd)]);
    }
}
