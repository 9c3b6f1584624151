//! On-disk layout of a table file.
//!
//! A table file is a [`Header`] followed by `orig_capacity` fixed-size [`Slot`]s.
//! All fields are native endian and `#[repr(C)]`, so any process on a machine with
//! the same word size can map the file and read it in place.
//!
//! ```text
//! Header (24 bytes): magic [u8; 4] | version u32 | orig_capacity u64 | live_count u64
//! Slot (1292 bytes): tag u8 | pad [u8; 3] | key_len u32 | key [u8; 256] | value_len u32 | value [u8; 1024]
//! ```
//!
//! The hash function (FxHash over the key bytes) and the probe rule (linear, wrapping,
//! starting at `hash % orig_capacity`) belong to [`VERSION`]; changing either one is a
//! format break.

use bytemuck::{Pod, Zeroable};
use modular_bitfield::prelude::B6;
use modular_bitfield::{Specifier, bitfield};

use crate::error::{Result, ShmhtError};

pub const MAGIC: [u8; 4] = *b"SHHT";
pub const VERSION: u32 = 1;

/// Largest key a slot holds inline.
pub const MAX_KEY_SIZE: usize = 256;
/// Largest value a slot holds inline.
pub const MAX_VALUE_SIZE: usize = 1024;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    pub orig_capacity: u64,
    pub live_count: u64,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<Header>();
const _: () = assert!(HEADER_SIZE == 24);

impl Header {
    pub fn new(capacity: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            orig_capacity: capacity,
            live_count: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }
}

#[derive(Specifier, PartialEq, Eq, Debug, Clone, Copy)]
pub enum Status {
    Empty,
    Occupied,
    Tombstone,
    Reserved,
}

#[bitfield(bits = 8)]
#[derive(Clone, Copy, Zeroable, Pod, Debug)]
#[repr(C)]
pub struct SlotTag {
    #[bits = 2]
    status: Status,
    #[skip]
    __: B6,
}

#[repr(C)]
#[derive(Clone, Copy, Zeroable, Pod)]
pub struct Slot {
    tag: SlotTag,
    _pad: [u8; 3],
    key_len: u32,
    key: [u8; MAX_KEY_SIZE],
    value_len: u32,
    value: [u8; MAX_VALUE_SIZE],
}

pub const SLOT_SIZE: usize = std::mem::size_of::<Slot>();
const _: () = assert!(SLOT_SIZE == 1292);

impl Slot {
    pub fn status(&self) -> Status {
        self.tag.status()
    }

    pub fn is_occupied(&self) -> bool {
        self.status() == Status::Occupied
    }

    pub fn is_empty(&self) -> bool {
        self.status() == Status::Empty
    }

    pub fn is_tombstone(&self) -> bool {
        self.status() == Status::Tombstone
    }

    // Lengths come from a shared file, clamp them so a corrupted slot can't index out of bounds.
    pub fn key(&self) -> &[u8] {
        let len = (self.key_len as usize).min(MAX_KEY_SIZE);
        &self.key[..len]
    }

    pub fn value(&self) -> &[u8] {
        let len = (self.value_len as usize).min(MAX_VALUE_SIZE);
        &self.value[..len]
    }

    pub fn holds_key(&self, key: &[u8]) -> bool {
        self.is_occupied() && self.key_len as usize == key.len() && self.key() == key
    }

    /// Writes key and value, then flips the tag to occupied.
    /// Callers check the sizes against `MAX_KEY_SIZE` / `MAX_VALUE_SIZE` first.
    pub(crate) fn occupy(&mut self, key: &[u8], value: &[u8]) {
        self.key[..key.len()].copy_from_slice(key);
        self.key_len = key.len() as u32;
        self.set_value(value);
        self.tag = SlotTag::new().with_status(Status::Occupied);
    }

    pub(crate) fn set_value(&mut self, value: &[u8]) {
        self.value[..value.len()].copy_from_slice(value);
        self.value_len = value.len() as u32;
    }

    pub(crate) fn mark_tombstone(&mut self) {
        self.tag = SlotTag::new().with_status(Status::Tombstone);
    }

    pub(crate) fn clear(&mut self) {
        self.tag = SlotTag::new();
        self.key_len = 0;
        self.value_len = 0;
    }
}

/// Exact byte length of a table holding `capacity` slots.
pub fn memory_size(capacity: u64) -> Result<usize> {
    usize::try_from(capacity)
        .ok()
        .and_then(|cap| cap.checked_mul(SLOT_SIZE))
        .and_then(|slots| slots.checked_add(HEADER_SIZE))
        .ok_or(ShmhtError::CapacityOverflow(capacity))
}

/// Copies the header out of `region`, regardless of its alignment.
pub fn read_header(region: &[u8]) -> Option<Header> {
    region
        .get(..HEADER_SIZE)
        .map(bytemuck::pod_read_unaligned::<Header>)
}

/// Checks the magic and version only, slots are not scanned.
pub fn is_valid(region: &[u8]) -> bool {
    read_header(region).is_some_and(|h| h.is_valid())
}

/// True when the header bytes are all zero: the state of a file that was just
/// created or extended and never formatted.
pub fn is_blank(region: &[u8]) -> bool {
    let len = region.len().min(HEADER_SIZE);
    region[..len].iter().all(|b| *b == 0)
}

/// Formats `region` for `capacity` slots.
///
/// When `force` is false and the region already carries a valid header this is a
/// no-op that preserves the data. Returns whether the region was (re)formatted.
pub fn init(region: &mut [u8], capacity: u64, force: bool) -> Result<bool> {
    let size = memory_size(capacity)?;
    if region.len() < size {
        return Err(ShmhtError::Validity(format!(
            "region of {} bytes cannot hold {capacity} slots ({size} bytes)",
            region.len()
        )));
    }

    if !force && is_valid(region) {
        return Ok(false);
    }

    let (head, rest) = region.split_at_mut(HEADER_SIZE);
    *bytemuck::from_bytes_mut::<Header>(head) = Header::new(capacity);
    let slots: &mut [Slot] = bytemuck::cast_slice_mut(&mut rest[..size - HEADER_SIZE]);
    for slot in slots {
        slot.clear();
    }
    Ok(true)
}
