// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A single-writer/single-reader byte ring over a region of the CnC file,
//! used for the to-driver and to-clients command rings.
//!
//! Layout: an 8-byte aligned header of two atomics (`tail`, `head`, byte
//! offsets wrapping modulo capacity) followed by `capacity` bytes of
//! message storage. Each record is `[length:i32][payload...]`, padded to
//! an 8-byte boundary; `length == 0` marks "nothing written past here yet
//! this lap", causing the reader to wrap to the start of the buffer.

use std::sync::atomic::{AtomicI64, Ordering};

const HEADER_LENGTH: usize = 16;
const RECORD_ALIGNMENT: usize = 8;

fn align(len: usize) -> usize {
    (len + RECORD_ALIGNMENT - 1) & !(RECORD_ALIGNMENT - 1)
}

/// Byte length of the header preceding a ring's message storage.
#[must_use]
pub const fn header_length() -> usize {
    HEADER_LENGTH
}

/// Byte ring over `base[..HEADER_LENGTH + capacity]`. `capacity` must be a
/// power of two.
pub struct Ring {
    base: *mut u8,
    capacity: usize,
}

// SAFETY: `tail`/`head` are accessed only through atomics at fixed offsets;
// the message region is written exclusively by the single producer and
// read exclusively by the single consumer, synchronized by those atomics.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Wrap `base[..HEADER_LENGTH + capacity]`. `capacity` must be a power
    /// of two.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of `HEADER_LENGTH +
    /// capacity` bytes for the lifetime of the returned `Ring`.
    pub unsafe fn new(base: *mut u8, capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self { base, capacity }
    }

    fn tail(&self) -> &AtomicI64 {
        // SAFETY: offset 0 is within the header, base valid per Self::new.
        unsafe { &*(self.base.cast::<AtomicI64>()) }
    }

    fn head(&self) -> &AtomicI64 {
        // SAFETY: offset 8 is within the header, base valid per Self::new.
        unsafe { &*(self.base.add(8).cast::<AtomicI64>()) }
    }

    fn data(&self) -> &mut [u8] {
        // SAFETY: HEADER_LENGTH..+capacity is within the mapping by
        // construction; single-writer/single-reader synchronization is
        // provided by tail/head.
        unsafe { std::slice::from_raw_parts_mut(self.base.add(HEADER_LENGTH), self.capacity) }
    }

    fn mask(&self, index: i64) -> usize {
        (index as u64 & (self.capacity as u64 - 1)) as usize
    }

    /// Write one message. Returns `false` if the ring has no room (the
    /// caller should retry next tick rather than block).
    pub fn write(&self, payload: &[u8]) -> bool {
        let record_len = 4 + payload.len();
        let aligned_len = align(record_len);
        let tail = self.tail().load(Ordering::Relaxed);
        let head = self.head().load(Ordering::Acquire);

        if (tail - head) as usize + aligned_len > self.capacity {
            return false;
        }

        let offset = self.mask(tail);
        let data = self.data();
        if offset + aligned_len > self.capacity {
            // Not enough contiguous room before wrap: mark remainder dead
            // with a zero-length record and retry from offset 0.
            data[offset..offset + 4].copy_from_slice(&0i32.to_le_bytes());
            let wrapped_tail = tail + (self.capacity - offset) as i64;
            self.tail().store(wrapped_tail + aligned_len as i64, Ordering::Release);
            let offset = 0;
            data[offset..offset + 4].copy_from_slice(&(record_len as i32).to_le_bytes());
            data[offset + 4..offset + 4 + payload.len()].copy_from_slice(payload);
            return true;
        }

        data[offset..offset + 4].copy_from_slice(&(record_len as i32).to_le_bytes());
        data[offset + 4..offset + 4 + payload.len()].copy_from_slice(payload);
        self.tail().store(tail + aligned_len as i64, Ordering::Release);
        true
    }

    /// Drain available messages, invoking `on_message` with each payload
    /// (header stripped). Returns the number of messages consumed.
    pub fn drain(&self, mut on_message: impl FnMut(&[u8])) -> usize {
        let mut head = self.head().load(Ordering::Relaxed);
        let tail = self.tail().load(Ordering::Acquire);
        let mut count = 0;

        while head < tail {
            let offset = self.mask(head);
            let data = self.data();
            if offset + 4 > self.capacity {
                head += (self.capacity - offset) as i64;
                continue;
            }
            let record_len = i32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
            if record_len == 0 {
                head += (self.capacity - offset) as i64;
                continue;
            }
            let payload_len = record_len as usize - 4;
            on_message(&data[offset + 4..offset + 4 + payload_len]);
            head += align(record_len as usize) as i64;
            count += 1;
        }

        self.head().store(head, Ordering::Release);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ring(capacity: usize) -> (Vec<u8>, Ring) {
        let mut buf = vec![0u8; HEADER_LENGTH + capacity];
        let ring = unsafe { Ring::new(buf.as_mut_ptr(), capacity) };
        (buf, ring)
    }

    #[test]
    fn writes_then_drains_in_order() {
        let (_buf, ring) = new_ring(256);
        assert!(ring.write(b"first"));
        assert!(ring.write(b"second"));

        let mut seen = Vec::new();
        let count = ring.drain(|payload| seen.push(payload.to_vec()));
        assert_eq!(count, 2);
        assert_eq!(seen, vec![b"first".to_vec(), b"second".to_vec()]);

        assert_eq!(ring.drain(|_| panic!("nothing left")), 0);
    }

    #[test]
    fn write_fails_once_the_ring_is_full() {
        let (_buf, ring) = new_ring(32);
        let mut wrote = 0;
        while ring.write(b"0123456789012345") {
            wrote += 1;
            if wrote > 10 {
                break;
            }
        }
        assert!(wrote >= 1);
        assert!(!ring.write(b"0123456789012345"));
    }

    #[test]
    fn draining_frees_room_for_more_writes() {
        let (_buf, ring) = new_ring(64);
        assert!(ring.write(b"abcdefghijklmnop"));
        assert!(ring.write(b"abcdefghijklmnop"));
        assert!(!ring.write(b"abcdefghijklmnop"));

        ring.drain(|_| {});
        assert!(ring.write(b"abcdefghijklmnop"));
    }
}
