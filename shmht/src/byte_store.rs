use std::fs::File;
use std::io;

use memmap2::{MmapMut, MmapOptions};

/// A fixed-length, writable byte region a [`HashTable`](crate::HashTable) lives in.
///
/// Regions must be at least 8-byte aligned so the header and slots can be viewed in place.
pub trait ByteStore: AsRef<[u8]> + AsMut<[u8]> {
    /// Pushes pending writes to the backing medium, a no-op for memory.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Heap region backed by `u64` words so its start is 8-byte aligned.
pub struct VecStore {
    words: Vec<u64>,
    len: usize,
}

impl VecStore {
    pub fn with_len(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }
}

impl AsRef<[u8]> for VecStore {
    fn as_ref(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }
}

impl AsMut<[u8]> for VecStore {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

impl ByteStore for VecStore {}

/// A read-write mapping shared with the file, writes are seen by every process mapping it.
pub struct MMapFile {
    mmap: MmapMut,
}

impl MMapFile {
    /// Maps the whole file.
    pub fn new(file: &File) -> io::Result<Self> {
        let mmap = unsafe { MmapMut::map_mut(file)? };
        Ok(Self { mmap })
    }

    /// Maps the first `len` bytes of the file.
    pub fn with_len(file: &File, len: usize) -> io::Result<Self> {
        let mmap = unsafe { MmapOptions::new().len(len).map_mut(file)? };
        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl AsRef<[u8]> for MMapFile {
    fn as_ref(&self) -> &[u8] {
        &self.mmap
    }
}

impl AsMut<[u8]> for MMapFile {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }
}

impl ByteStore for MMapFile {
    fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}
