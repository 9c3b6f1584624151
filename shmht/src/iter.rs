use std::iter::FusedIterator;

use crate::layout::Slot;

/// Single-pass cursor over the occupied slots of a table, in slot order.
///
/// Keys and values are borrowed straight from the region, nothing is copied.
pub struct Iter<'a> {
    slots: &'a [Slot],
    next_index: usize,
}

impl<'a> Iter<'a> {
    pub(crate) fn new(slots: &'a [Slot]) -> Self {
        Self {
            slots,
            next_index: 0,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slot) = self.slots.get(self.next_index) {
            self.next_index += 1;
            if slot.is_occupied() {
                return Some((slot.key(), slot.value()));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len().saturating_sub(self.next_index)))
    }
}

impl FusedIterator for Iter<'_> {}
