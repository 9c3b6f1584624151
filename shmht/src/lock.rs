use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use libc::{LOCK_EX, LOCK_UN, flock};

use crate::error::{Result, ShmhtError};

/// Whole-file advisory exclusive lock, held until the guard is dropped.
///
/// `flock` locks belong to the open file description, so two separately opened
/// descriptors for the same path exclude each other even inside one process.
/// The lock is not reentrant: taking it twice through the same guard owner deadlocks.
#[must_use]
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Blocks until the lock is acquired.
    pub fn exclusive(file: &'a File) -> Result<Self> {
        loop {
            let result = unsafe { flock(file.as_raw_fd(), LOCK_EX) };
            if result == 0 {
                return Ok(Self { file });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(ShmhtError::Lock(err));
            }
        }
    }

    /// Releases the lock, reporting a failure instead of logging it.
    pub fn unlock(self) -> Result<()> {
        let result = Self::release(self.file);
        std::mem::forget(self);
        result.map_err(ShmhtError::Lock)
    }

    fn release(file: &File) -> io::Result<()> {
        let result = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = Self::release(self.file) {
            tracing::warn!(error = %e, fd = self.file.as_raw_fd(), "failed to release table lock");
        }
    }
}
