//! Process-wide table of open tables, addressed by small integer handles.
//!
//! Every table operation goes through two locks: the table's in-process mutex, then the
//! whole-file `flock` that serializes it against other processes. Both are released on
//! every exit path.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::attach::{AttachedTable, attach};
use crate::byte_store::MMapFile;
use crate::config::{RegistryConfig, TableOptions};
use crate::error::{Result, ShmhtError};
use crate::lock::FileLock;
use crate::table::HashTable;

/// Reference to one open mapping of a table, valid in the process that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    pub fn from_raw(id: usize) -> Self {
        Self(id)
    }

    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registry entry. `None` once the handle has been closed.
struct OpenTable {
    inner: Mutex<Option<AttachedTable>>,
}

struct Slots {
    entries: Box<[Option<Arc<OpenTable>>]>,
    last: Option<usize>,
    open: usize,
}

impl Slots {
    /// Round-robin scan starting after the last assigned index, wrapping once.
    fn next_free(&self) -> Option<usize> {
        let len = self.entries.len();
        let start = self.last.map_or(0, |last| last + 1);
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| self.entries[idx].is_none())
    }
}

/// Handles to open tables for one process.
pub struct Registry {
    slots: Mutex<Slots>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(&RegistryConfig::default())
    }

    pub fn with_config(config: &RegistryConfig) -> Self {
        let entries = (0..config.max_open_tables).map(|_| None).collect();
        Self {
            slots: Mutex::new(Slots {
                entries,
                last: None,
                open: 0,
            }),
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Number of handles currently open.
    pub fn open_tables(&self) -> usize {
        self.slots.lock().open
    }

    /// Opens the table file at `path`, creating it with `capacity` slots when needed.
    ///
    /// A `capacity` of zero reattaches to an existing table. See [`TableOptions`].
    pub fn open(&self, path: impl AsRef<Path>, capacity: u64, force_init: bool) -> Result<Handle> {
        self.open_with(
            path,
            &TableOptions::new()
                .capacity(capacity)
                .force_init(force_init),
        )
    }

    pub fn open_with(&self, path: impl AsRef<Path>, options: &TableOptions) -> Result<Handle> {
        // reserve the slot first so a full registry fails before touching the file
        let entry = Arc::new(OpenTable {
            inner: Mutex::new(None),
        });
        let idx = {
            let mut slots = self.slots.lock();
            let idx = slots
                .next_free()
                .ok_or(ShmhtError::ExhaustedHandles(slots.entries.len()))?;
            slots.entries[idx] = Some(entry.clone());
            slots.last = Some(idx);
            slots.open += 1;
            idx
        };

        match attach(path, options) {
            Ok(attached) => {
                let slots = self.slots.lock();
                let ours = slots.entries[idx]
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &entry));
                if !ours {
                    // closed while attaching, the mapping goes away with `attached`
                    return Err(ShmhtError::InvalidHandle(Handle(idx)));
                }
                *entry.inner.lock() = Some(attached);
                tracing::debug!(handle = idx, "registered table");
                Ok(Handle(idx))
            }
            Err(e) => {
                let mut slots = self.slots.lock();
                let ours = slots.entries[idx]
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &entry));
                if ours {
                    slots.entries[idx] = None;
                    slots.open -= 1;
                }
                Err(e)
            }
        }
    }

    /// Unmaps the table and closes its descriptor. The file itself stays on disk.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let entry = {
            let mut slots = self.slots.lock();
            let entry = slots
                .entries
                .get_mut(handle.0)
                .and_then(Option::take)
                .ok_or(ShmhtError::InvalidHandle(handle))?;
            slots.open -= 1;
            entry
        };

        // waits for any operation still running on this handle
        let attached = entry.inner.lock().take();
        if let Some(AttachedTable { path, file, table }) = attached {
            let live = {
                let _lock = FileLock::exclusive(&file)?;
                table.destroy()
            };
            tracing::debug!(handle = %handle, path = %path.display(), live, "closed table");
        }
        Ok(())
    }

    fn resolve(&self, handle: Handle) -> Result<Arc<OpenTable>> {
        let slots = self.slots.lock();
        slots
            .entries
            .get(handle.0)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or(ShmhtError::InvalidHandle(handle))
    }

    /// Runs `f` on the table with both the in-process mutex and the file lock held.
    fn with_table<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut HashTable<MMapFile>) -> Result<R>,
    ) -> Result<R> {
        let entry = self.resolve(handle)?;
        let mut inner = entry.inner.lock();
        // an entry still attaching or already closed looks the same as a bad id
        let attached = inner.as_mut().ok_or(ShmhtError::InvalidHandle(handle))?;
        let _lock = FileLock::exclusive(&attached.file)?;
        attached.table.refresh()?;
        f(&mut attached.table)
    }

    /// Copies out the value stored for `key`.
    pub fn get(&self, handle: Handle, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_table(handle, |table| Ok(table.get(key).map(<[u8]>::to_vec)))
    }

    pub fn set(&self, handle: Handle, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_table(handle, |table| table.set(key, value))
    }

    /// Returns true iff the key was present and removed.
    pub fn remove(&self, handle: Handle, key: &[u8]) -> Result<bool> {
        self.with_table(handle, |table| Ok(table.remove(key)))
    }

    /// Calls `visit` once per live entry, in slot order, while the table is locked.
    ///
    /// `visit` must not call back into this handle's operations, that deadlocks.
    pub fn foreach(&self, handle: Handle, mut visit: impl FnMut(&[u8], &[u8])) -> Result<()> {
        self.with_table(handle, |table| {
            for (key, value) in table.iter() {
                visit(key, value);
            }
            Ok(())
        })
    }

    /// Flushes outstanding writes of the mapping to the file (`msync`).
    pub fn flush(&self, handle: Handle) -> Result<()> {
        self.with_table(handle, |table| table.flush())
    }

    /// Number of live entries.
    pub fn len(&self, handle: Handle) -> Result<u64> {
        self.with_table(handle, |table| Ok(table.len()))
    }

    /// Number of slots the table was created with.
    pub fn capacity(&self, handle: Handle) -> Result<u64> {
        self.with_table(handle, |table| Ok(table.capacity()))
    }
}
