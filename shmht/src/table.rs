use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::byte_store::ByteStore;
use crate::error::{Result, ShmhtError};
use crate::iter::Iter;
use crate::layout::{
    self, HEADER_SIZE, Header, MAX_KEY_SIZE, MAX_VALUE_SIZE, SLOT_SIZE, Slot, Status,
};

/// Outcome of walking a key's probe sequence.
enum Probe {
    /// Slot holding the key.
    Found(usize),
    /// Slot a new entry for the key should go in.
    Vacant(usize),
    /// Every slot is occupied by some other key.
    Full,
}

/// Open addressing hash table living directly inside a [`ByteStore`].
///
/// Keys and values are arbitrary byte strings stored inline in fixed-size slots.
/// The number of slots is fixed when the region is formatted and never changes,
/// removed entries leave tombstones that later inserts may reuse.
pub struct HashTable<BS: ByteStore> {
    store: BS,
    capacity: usize,
}

impl<BS: ByteStore> HashTable<BS> {
    /// Formats `store` for `capacity` slots unless it already holds a valid table and
    /// `force` is false, then opens it.
    pub fn init(mut store: BS, capacity: u64, force: bool) -> Result<Self> {
        layout::init(store.as_mut(), capacity, force)?;
        Self::attach(store)
    }

    /// Opens a region that already holds a valid table, using its stored capacity.
    pub fn attach(store: BS) -> Result<Self> {
        let region = store.as_ref();
        if region.as_ptr().align_offset(std::mem::align_of::<Header>()) != 0 {
            return Err(ShmhtError::Validity("table region is misaligned".to_string()));
        }
        let header = layout::read_header(region)
            .filter(Header::is_valid)
            .ok_or_else(|| ShmhtError::Validity("missing or unknown table header".to_string()))?;

        let size = layout::memory_size(header.orig_capacity)?;
        if region.len() < size {
            return Err(ShmhtError::Validity(format!(
                "region of {} bytes is shorter than the {size} bytes its header describes",
                region.len()
            )));
        }

        Ok(Self {
            store,
            // memory_size succeeded so the capacity fits in usize
            capacity: header.orig_capacity as usize,
        })
    }

    /// Number of slots, fixed for the table's lifetime.
    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    /// Number of live entries.
    pub fn len(&self) -> u64 {
        self.header().live_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte length of the region this table occupies.
    pub fn memory_size(&self) -> usize {
        HEADER_SIZE + self.capacity * SLOT_SIZE
    }

    /// Re-reads the header before an operation on a region other handles may reformat.
    ///
    /// A table reinitialised elsewhere with a capacity that still fits this region is
    /// adopted, otherwise the region no longer describes anything this view can probe.
    pub fn refresh(&mut self) -> Result<()> {
        let region = self.store.as_ref();
        let header = layout::read_header(region)
            .filter(Header::is_valid)
            .ok_or_else(|| ShmhtError::Validity("table header was overwritten".to_string()))?;

        let size = layout::memory_size(header.orig_capacity)?;
        if size > region.len() {
            return Err(ShmhtError::Validity(format!(
                "table was reinitialised with {} slots, more than the {} bytes mapped here; reopen it",
                header.orig_capacity,
                region.len()
            )));
        }
        self.capacity = header.orig_capacity as usize;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()?;
        Ok(())
    }

    fn header(&self) -> &Header {
        bytemuck::from_bytes(&self.store.as_ref()[..HEADER_SIZE])
    }

    fn header_mut(&mut self) -> &mut Header {
        bytemuck::from_bytes_mut(&mut self.store.as_mut()[..HEADER_SIZE])
    }

    fn slots(&self) -> &[Slot] {
        let end = self.memory_size();
        bytemuck::cast_slice(&self.store.as_ref()[HEADER_SIZE..end])
    }

    fn slots_mut(&mut self) -> &mut [Slot] {
        let end = self.memory_size();
        bytemuck::cast_slice_mut(&mut self.store.as_mut()[HEADER_SIZE..end])
    }

    fn home_slot(&self, key: &[u8]) -> usize {
        let mut hasher = FxHasher::default();
        hasher.write(key);
        (hasher.finish() % self.capacity as u64) as usize
    }

    /// Linear probing from the key's home slot.
    /// An empty slot ends the walk, tombstones are skipped but remembered for reuse.
    fn probe(&self, key: &[u8]) -> Probe {
        if self.capacity == 0 {
            return Probe::Full;
        }

        let slots = self.slots();
        let mut index = self.home_slot(key);
        let mut reusable = None;

        for _ in 0..self.capacity {
            let slot = &slots[index];
            match slot.status() {
                Status::Empty => return Probe::Vacant(reusable.unwrap_or(index)),
                Status::Occupied if slot.holds_key(key) => return Probe::Found(index),
                Status::Tombstone => {
                    reusable.get_or_insert(index);
                }
                _ => {}
            }
            index = (index + 1) % self.capacity;
        }

        reusable.map_or(Probe::Full, Probe::Vacant)
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        match self.probe(key) {
            Probe::Found(index) => Some(self.slots()[index].value()),
            Probe::Vacant(_) | Probe::Full => None,
        }
    }

    /// Inserts or overwrites `key`.
    ///
    /// Fails with [`ShmhtError::TableFull`] when no slot is left, the table never grows.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > MAX_KEY_SIZE {
            return Err(ShmhtError::KeyTooLarge(key.len()));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(ShmhtError::ValueTooLarge(value.len()));
        }

        match self.probe(key) {
            Probe::Found(index) => {
                self.slots_mut()[index].set_value(value);
            }
            Probe::Vacant(index) => {
                self.slots_mut()[index].occupy(key, value);
                self.header_mut().live_count += 1;
            }
            Probe::Full => return Err(ShmhtError::TableFull),
        }
        Ok(())
    }

    /// Turns the key's slot into a tombstone, returns whether the key was present.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.probe(key) {
            Probe::Found(index) => {
                self.slots_mut()[index].mark_tombstone();
                let header = self.header_mut();
                header.live_count = header.live_count.saturating_sub(1);
                true
            }
            Probe::Vacant(_) | Probe::Full => false,
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self.slots())
    }

    /// Releases this view of the table and returns its live entry count.
    /// The region's contents are left as they are for other users.
    pub fn destroy(self) -> u64 {
        self.len()
    }
}

impl<'a, BS: ByteStore> IntoIterator for &'a HashTable<BS> {
    type Item = (&'a [u8], &'a [u8]);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_store::VecStore;
    use proptest::prelude::*;
    use std::collections::{HashMap as StdHashMap, HashSet};

    fn table(capacity: u64) -> HashTable<VecStore> {
        let store = VecStore::with_len(layout::memory_size(capacity).unwrap());
        HashTable::init(store, capacity, false).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let mut t = table(16);
        t.set(b"hello", b"world").unwrap();

        assert_eq!(t.get(b"hello"), Some(b"world".as_ref()));
        assert_eq!(t.get(b"not_found"), None);
        assert_eq!(t.len(), 1);
        assert_eq!(t.capacity(), 16);
    }

    #[test]
    fn test_embedded_zero_bytes() {
        let mut t = table(16);
        t.set(b"a\0b", b"\0\0x\0").unwrap();
        t.set(b"a", b"plain").unwrap();

        assert_eq!(t.get(b"a\0b"), Some(b"\0\0x\0".as_ref()));
        assert_eq!(t.get(b"a"), Some(b"plain".as_ref()));
        assert_eq!(t.get(b"a\0"), None);
    }

    #[test]
    fn test_empty_key_and_value() {
        let mut t = table(4);
        t.set(b"", b"").unwrap();
        assert_eq!(t.get(b""), Some(b"".as_ref()));
        assert!(t.remove(b""));
        assert_eq!(t.get(b""), None);
    }

    #[test]
    fn test_overwrite_keeps_count() {
        let mut t = table(8);
        t.set(b"key", b"value1").unwrap();
        t.set(b"key", b"a much longer value2").unwrap();
        t.set(b"key", b"v3").unwrap();

        assert_eq!(t.get(b"key"), Some(b"v3".as_ref()));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut t = table(8);
        t.set(b"k1", b"v1").unwrap();

        assert!(t.remove(b"k1"));
        assert!(!t.remove(b"k1"));
        assert_eq!(t.get(b"k1"), None);
        assert_eq!(t.len(), 0);
        assert!(t.is_empty());
    }

    #[test]
    fn test_tombstone_reuse_does_not_resurrect() {
        // a single slot forces every key through the same probe sequence
        let mut t = table(1);
        t.set(b"k1", b"v1").unwrap();
        assert!(t.remove(b"k1"));

        t.set(b"k2", b"v2").unwrap();
        assert_eq!(t.get(b"k2"), Some(b"v2".as_ref()));
        assert_eq!(t.get(b"k1"), None);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_probe_chain_survives_removal() {
        let mut t = table(2);
        t.set(b"first", b"1").unwrap();
        t.set(b"second", b"2").unwrap();

        // whichever key was displaced must still be reachable past the tombstone
        assert!(t.remove(b"first"));
        assert_eq!(t.get(b"second"), Some(b"2".as_ref()));

        t.set(b"third", b"3").unwrap();
        assert_eq!(t.get(b"third"), Some(b"3".as_ref()));
        assert_eq!(t.get(b"second"), Some(b"2".as_ref()));
        assert_eq!(t.get(b"first"), None);
    }

    #[test]
    fn test_no_duplicate_after_tombstone() {
        let mut t = table(2);
        t.set(b"a", b"1").unwrap();
        t.set(b"b", b"2").unwrap();
        assert!(t.remove(b"a"));

        // updating b must hit its existing slot, not the tombstone in front of it
        t.set(b"b", b"3").unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.iter().count(), 1);
        assert_eq!(t.get(b"b"), Some(b"3".as_ref()));
    }

    #[test]
    fn test_table_full() {
        let capacity = 16;
        let mut t = table(capacity);
        for i in 0..capacity {
            t.set(format!("key{i}").as_bytes(), b"v").unwrap();
        }
        assert_eq!(t.len(), capacity);

        let err = t.set(b"one too many", b"v").unwrap_err();
        assert!(matches!(err, ShmhtError::TableFull));

        // existing keys can still be overwritten on a full table
        t.set(b"key3", b"new").unwrap();
        assert_eq!(t.get(b"key3"), Some(b"new".as_ref()));

        // and a removal frees a slot again
        assert!(t.remove(b"key5"));
        t.set(b"one too many", b"v").unwrap();
        assert_eq!(t.len(), capacity);
    }

    #[test]
    fn test_half_full_table() {
        let mut t = table(64);
        for i in 0..32u32 {
            t.set(&i.to_le_bytes(), &(i * 7).to_le_bytes()).unwrap();
        }
        for i in 0..32u32 {
            assert_eq!(t.get(&i.to_le_bytes()), Some((i * 7).to_le_bytes().as_ref()));
        }
    }

    #[test]
    fn test_size_limits() {
        let mut t = table(4);
        let big_key = vec![1u8; MAX_KEY_SIZE + 1];
        let big_value = vec![2u8; MAX_VALUE_SIZE + 1];

        assert!(matches!(
            t.set(&big_key, b"v").unwrap_err(),
            ShmhtError::KeyTooLarge(n) if n == MAX_KEY_SIZE + 1
        ));
        assert!(matches!(
            t.set(b"k", &big_value).unwrap_err(),
            ShmhtError::ValueTooLarge(n) if n == MAX_VALUE_SIZE + 1
        ));
        assert!(t.is_empty());

        let max_key = vec![3u8; MAX_KEY_SIZE];
        let max_value = vec![4u8; MAX_VALUE_SIZE];
        t.set(&max_key, &max_value).unwrap();
        assert_eq!(t.get(&max_key), Some(max_value.as_slice()));
    }

    #[test]
    fn test_zero_capacity() {
        let mut t = table(0);
        assert_eq!(t.get(b"k"), None);
        assert!(!t.remove(b"k"));
        assert!(matches!(t.set(b"k", b"v"), Err(ShmhtError::TableFull)));
    }

    #[test]
    fn test_iter_after_remove() {
        let mut t = table(16);
        t.set(b"a", b"1").unwrap();
        t.set(b"b", b"2").unwrap();
        t.set(b"c", b"3").unwrap();
        t.remove(b"b");

        let seen: HashSet<(Vec<u8>, Vec<u8>)> =
            t.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        let expected: HashSet<(Vec<u8>, Vec<u8>)> = [
            (b"a".to_vec(), b"1".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
        .into_iter()
        .collect();
        assert_eq!(seen, expected);
        assert_eq!((&t).into_iter().count(), 2);
    }

    #[test]
    fn test_init_preserves_existing() {
        let capacity = 8;
        let mut t = table(capacity);
        t.set(b"kept", b"yes").unwrap();

        let store = t.store;
        let t = HashTable::init(store, capacity, false).unwrap();
        assert_eq!(t.get(b"kept"), Some(b"yes".as_ref()));

        let t = HashTable::init(t.store, capacity, true).unwrap();
        assert_eq!(t.get(b"kept"), None);
        assert_eq!(t.destroy(), 0);
    }

    #[test]
    fn test_attach_blank_region_fails() {
        let store = VecStore::with_len(layout::memory_size(4).unwrap());
        assert!(matches!(
            HashTable::attach(store),
            Err(ShmhtError::Validity(_))
        ));
    }

    #[test]
    fn test_attach_short_region_fails() {
        let mut big = table(4);
        big.set(b"k", b"v").unwrap();
        let mut short = VecStore::with_len(layout::memory_size(2).unwrap());
        let len = short.as_ref().len();
        short.as_mut().copy_from_slice(&big.store.as_ref()[..len]);

        assert!(matches!(
            HashTable::attach(short),
            Err(ShmhtError::Validity(_))
        ));
    }

    #[test]
    fn test_refresh_follows_reinitialised_header() {
        let mut t = table(8);
        t.set(b"old", b"1").unwrap();

        // someone else formats the same region with fewer slots
        layout::init(t.store.as_mut(), 4, true).unwrap();
        t.refresh().unwrap();
        assert_eq!(t.capacity(), 4);
        assert_eq!(t.get(b"old"), None);

        t.set(b"new", b"2").unwrap();
        let reopened = HashTable::attach(t.store).unwrap();
        assert_eq!(reopened.capacity(), 4);
        assert_eq!(reopened.get(b"new"), Some(b"2".as_ref()));
    }

    #[test]
    fn test_refresh_rejects_header_beyond_region() {
        let mut t = table(4);
        bytemuck::from_bytes_mut::<Header>(&mut t.store.as_mut()[..HEADER_SIZE]).orig_capacity = 16;
        assert!(matches!(t.refresh(), Err(ShmhtError::Validity(_))));

        t.store.as_mut()[..HEADER_SIZE].fill(0);
        assert!(matches!(t.refresh(), Err(ShmhtError::Validity(_))));
    }

    fn check_prop(ops: Vec<(Vec<u8>, Option<Vec<u8>>)>) {
        let mut t = table(256);
        let mut expected = StdHashMap::new();

        for (k, v) in ops {
            match v {
                Some(v) => {
                    t.set(&k, &v).unwrap();
                    expected.insert(k, v);
                }
                None => {
                    assert_eq!(t.remove(&k), expected.remove(&k).is_some(), "key: {k:?}");
                }
            }
        }

        assert_eq!(t.len(), expected.len() as u64);
        for (k, v) in expected.iter() {
            assert_eq!(t.get(k), Some(v.as_slice()), "key: {k:?}");
        }

        let seen: StdHashMap<Vec<u8>, Vec<u8>> =
            t.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn it_s_a_hash_map() {
        let ops = proptest::collection::vec(
            (
                proptest::collection::vec(0u8..8, 0..4),
                proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
            ),
            1..200,
        );

        proptest!(|(ops in ops)| {
            check_prop(ops);
        });
    }
}
