//! A fixed-capacity key-value hash table stored in a memory-mapped file.
//!
//! Any number of processes can open the same file; every operation holds an
//! exclusive `flock` on it, so operations on one table are serialized across
//! processes. Tables never grow: the slot count is chosen when the file is
//! first created and recovered from the header when it is reopened.
//!
//! ```no_run
//! use shmht::Registry;
//!
//! # fn main() -> shmht::Result<()> {
//! let registry = Registry::global();
//! let table = registry.open("/tmp/sessions.shmht", 1024, false)?;
//! registry.set(table, b"user:1", b"alice")?;
//! assert_eq!(registry.get(table, b"user:1")?, Some(b"alice".to_vec()));
//! registry.close(table)?;
//! # Ok(())
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("shmht relies on mmap and flock and only builds on unix targets");

pub mod attach;
pub mod byte_store;
pub mod config;
pub mod error;
pub mod iter;
pub mod layout;
mod lock;
pub mod registry;
pub mod table;

pub use attach::{AttachedTable, attach};
pub use byte_store::{ByteStore, MMapFile, VecStore};
pub use config::{MAX_OPEN_TABLES, RegistryConfig, TableOptions};
pub use error::{Result, ShmhtError};
pub use iter::Iter;
pub use layout::{MAX_KEY_SIZE, MAX_VALUE_SIZE, memory_size};
pub use lock::FileLock;
pub use registry::{Handle, Registry};
pub use table::HashTable;
