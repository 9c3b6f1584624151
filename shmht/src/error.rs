use std::io;
use thiserror::Error;

use crate::layout::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::registry::Handle;

/// Errors that can occur when opening or operating on a shared table
#[derive(Error, Debug)]
pub enum ShmhtError {
    /// IO errors from open/seek/set_len/mmap/msync
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The whole-file lock could not be acquired or released
    #[error("lock error: {0}")]
    Lock(io::Error),

    /// The file exists but is not a table this engine can interpret
    #[error("invalid table file: {0}")]
    Validity(String),

    /// The caller asked for more slots than the existing table holds
    #[error(
        "file has smaller capacity than requested (req {requested}, have {stored}); specify force_init to overwrite an existing table"
    )]
    CapacityMismatch { requested: u64, stored: u64 },

    /// No capacity given and no valid table to reattach to
    #[error("capacity must be specified when creating a table")]
    MissingCapacity,

    /// The layout for this capacity does not fit in the address space
    #[error("capacity {0} is too large to map")]
    CapacityOverflow(u64),

    /// Probing visited every slot without finding a free or matching one
    #[error("table is full")]
    TableFull,

    #[error("key of {0} bytes exceeds the {max} byte slot limit", max = MAX_KEY_SIZE)]
    KeyTooLarge(usize),

    #[error("value of {0} bytes exceeds the {max} byte slot limit", max = MAX_VALUE_SIZE)]
    ValueTooLarge(usize),

    /// Handle out of range or not currently open
    #[error("invalid table id: {0}")]
    InvalidHandle(Handle),

    /// Every registry slot in this process is taken
    #[error("exceeded maximum concurrently open tables in this process ({0})")]
    ExhaustedHandles(usize),
}

impl ShmhtError {
    /// True for the errors that stem from a capacity request the engine cannot honor.
    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            ShmhtError::CapacityMismatch { .. }
                | ShmhtError::MissingCapacity
                | ShmhtError::CapacityOverflow(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ShmhtError>;
