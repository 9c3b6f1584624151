//! Attach-or-create: open a table file, reusing a valid table in it or laying out a new one.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::byte_store::MMapFile;
use crate::config::TableOptions;
use crate::error::{Result, ShmhtError};
use crate::layout::{self, HEADER_SIZE, Header};
use crate::lock::FileLock;
use crate::table::HashTable;

/// A table file that is open and mapped.
pub struct AttachedTable {
    pub(crate) path: PathBuf,
    pub(crate) file: File,
    pub(crate) table: HashTable<MMapFile>,
}

impl AttachedTable {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &HashTable<MMapFile> {
        &self.table
    }

    pub fn into_parts(self) -> (File, HashTable<MMapFile>) {
        (self.file, self.table)
    }
}

/// What the start of an existing file holds.
enum Existing {
    Valid(Header),
    /// All zero, never formatted.
    Blank,
    /// Something that is not a table this engine understands.
    Foreign,
}

/// Opens (creating if missing) the file at `path` and maps a table in it.
///
/// The whole sequence runs under the file's exclusive lock. Every early return
/// drops the mapping, the lock and the descriptor in that order.
pub fn attach(path: impl AsRef<Path>, options: &TableOptions) -> Result<AttachedTable> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)?;

    let table = {
        let _lock = FileLock::exclusive(&file)?;
        attach_locked(path, &file, options)?
    };

    Ok(AttachedTable {
        path: path.to_path_buf(),
        file,
        table,
    })
}

fn attach_locked(path: &Path, file: &File, options: &TableOptions) -> Result<HashTable<MMapFile>> {
    let file_len = file.metadata()?.len();
    let mut capacity = options.capacity;
    let mut reattached = false;

    if !options.force_init && file_len > 0 {
        match inspect(file, file_len)? {
            Existing::Valid(header) => {
                if capacity > header.orig_capacity {
                    return Err(ShmhtError::CapacityMismatch {
                        requested: capacity,
                        stored: header.orig_capacity,
                    });
                }
                capacity = header.orig_capacity;

                let expected = layout::memory_size(capacity)? as u64;
                if file_len != expected {
                    return Err(ShmhtError::Validity(format!(
                        "{} is {file_len} bytes but a {capacity} slot table takes {expected}",
                        path.display()
                    )));
                }
                reattached = true;
            }
            Existing::Blank => {}
            Existing::Foreign => {
                return Err(ShmhtError::Validity(format!(
                    "{} does not start with a table header, pass force_init to overwrite it",
                    path.display()
                )));
            }
        }
    }

    if capacity == 0 {
        return Err(ShmhtError::MissingCapacity);
    }

    let size = layout::memory_size(capacity)? as u64;
    // other handles may still map the old length, so the file only ever grows
    if file_len > size {
        return Err(ShmhtError::Validity(format!(
            "{} is {file_len} bytes, longer than the {size} bytes a {capacity} slot table takes; \
             remove the file to create a smaller table",
            path.display()
        )));
    }
    if file_len < size {
        file.set_len(size)?;
    }
    let size = size as usize;

    let store = MMapFile::with_len(file, size)?;
    let table = HashTable::init(store, capacity, options.force_init)?;

    tracing::debug!(
        path = %path.display(),
        capacity,
        live = table.len(),
        reattached,
        "attached table"
    );
    Ok(table)
}

/// Maps just the header (or the whole file when it is shorter) to see what is there.
fn inspect(file: &File, file_len: u64) -> Result<Existing> {
    let len = file_len.min(HEADER_SIZE as u64) as usize;
    let head = MMapFile::with_len(file, len)?;
    let region = head.as_ref();

    let existing = match layout::read_header(region) {
        Some(header) if header.is_valid() => Existing::Valid(header),
        _ if layout::is_blank(region) => Existing::Blank,
        _ => Existing::Foreign,
    };
    Ok(existing)
}
