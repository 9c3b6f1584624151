use std::path::Path;

use crate::error::Result;
use crate::registry::{Handle, Registry};

/// Default number of tables one process may hold open at once.
pub const MAX_OPEN_TABLES: usize = 2048;

/// How a table file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableOptions {
    /// Number of slots for a new table. Zero reattaches to an existing table and
    /// fails if there is none; a non-zero value may not exceed an existing table's
    /// capacity unless `force_init` is set.
    pub capacity: u64,

    /// Discard any existing contents and format the file from scratch.
    pub force_init: bool,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn force_init(mut self, force_init: bool) -> Self {
        self.force_init = force_init;
        self
    }

    /// Opens `path` with these options in `registry`.
    pub fn open(&self, registry: &Registry, path: impl AsRef<Path>) -> Result<Handle> {
        registry.open_with(path, self)
    }
}

/// Sizing of a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on concurrently open handles (default: 2048)
    pub max_open_tables: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_open_tables: MAX_OPEN_TABLES,
        }
    }
}
