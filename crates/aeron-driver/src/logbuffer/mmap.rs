// SPDX-License-Identifier: Apache-2.0 OR MIT

//! File-backed memory mapping for log buffers.
//!
//! A log buffer is a regular file of fixed length (`3 * termLength +
//! metadataLength`), created once by the Conductor and mapped `MAP_SHARED`
//! by every agent and client that touches it. Unlike a POSIX shared-memory
//! segment the backing object is a real path under the aeron directory, so
//! it survives the process that created it (the directory itself is wiped
//! on next startup; see `driver::remove_aeron_dir`).

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use crate::error::{Error, Result};

/// A `mmap`'d, `MAP_SHARED` view over a fixed-length file.
///
/// Unmaps on drop. Does not close or remove the backing file; callers that
/// created the file are responsible for removing it once every mapping is
/// gone.
pub struct MappedFile {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapped region is shared memory accessed from multiple
// threads through atomic loads/stores on frame-length and position fields;
// ordinary byte ranges (payloads) are single-writer by construction (see
// logbuffer::appender and logbuffer::rebuild).
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Create a new file of exactly `len` bytes at `path` and map it.
    /// Fails if the file already exists.
    pub fn create(path: &Path, len: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(len as u64)?;
        Self::map(&file, len)
    }

    /// Open an existing log buffer file and map it. `len` must match the
    /// file's actual length.
    pub fn open(path: &Path, len: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let actual = file.metadata()?.len();
        if actual != len as u64 {
            return Err(Error::Generic(format!(
                "log buffer {} has length {actual}, expected {len}",
                path.display()
            )));
        }
        Self::map(&file, len)
    }

    fn map(file: &File, len: usize) -> Result<Self> {
        // SAFETY:
        // - file is a valid, open fd with read/write access to a region of
        //   at least `len` bytes (just created or verified above).
        // - PROT_READ | PROT_WRITE matches the fd's access mode.
        // - MAP_SHARED is required so writes are visible to other mappers
        //   of the same file (other agents, and client processes).
        // - offset 0 maps from the start of the file.
        // - mmap returns MAP_FAILED on error, checked below.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the whole mapping as a byte slice.
    ///
    /// # Safety
    /// Callers must not alias this with a concurrent `&mut [u8]` borrow of
    /// an overlapping range from another thread without the synchronization
    /// the log buffer format provides (atomic frame-length/tail fields).
    #[must_use]
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }

    /// Mutable view over the whole mapping.
    ///
    /// # Safety
    /// Same aliasing requirement as [`Self::as_slice`].
    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY: self.ptr/self.len came from a successful mmap in
        // Self::map and have not been unmapped before (Drop runs once).
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_zero_initializes_and_open_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.logbuffer");

        let created = MappedFile::create(&path, 4096).unwrap();
        // SAFETY: single-threaded test, exclusive access.
        unsafe {
            assert_eq!(created.as_slice()[0], 0);
            created.as_mut_slice()[0] = 0x42;
        }
        drop(created);

        let opened = MappedFile::open(&path, 4096).unwrap();
        // SAFETY: single-threaded test, exclusive access.
        unsafe {
            assert_eq!(opened.as_slice()[0], 0x42);
        }
    }

    #[test]
    fn open_rejects_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.logbuffer");
        MappedFile::create(&path, 4096).unwrap();
        assert!(MappedFile::open(&path, 8192).is_err());
    }

    #[test]
    fn create_fails_if_file_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.logbuffer");
        MappedFile::create(&path, 4096).unwrap();
        assert!(MappedFile::create(&path, 4096).is_err());
    }
}
