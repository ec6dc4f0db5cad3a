//! Tag ↔ slot bijection and free-slot bookkeeping.
//!
//! Callers address points by stable [`Tag`]s; the index stores them in dense
//! [`Slot`]s that get recycled after consolidation. [`TagMap`] owns both
//! directions of the mapping plus the free list, so the bijection invariant
//! lives in one place. Locking is the caller's concern; the index wraps this
//! in a `RwLock`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::{Slot, Tag};

/// Bidirectional tag/slot mapping with a recycled-slot free list.
///
/// Invariant: `tag_to_slot` and `slot_to_tag` are exact inverses, and no slot
/// appears both in the mapping and on the free list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagMap {
    tag_to_slot: HashMap<Tag, Slot>,
    slot_to_tag: HashMap<Slot, Tag>,
    free_slots: Vec<Slot>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (tagged) points.
    pub fn len(&self) -> usize {
        self.tag_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tag_to_slot.is_empty()
    }

    /// Slot currently bound to `tag`, if the tag is live.
    #[inline]
    pub fn slot_of(&self, tag: Tag) -> Option<Slot> {
        self.tag_to_slot.get(&tag).copied()
    }

    /// Tag currently bound to `slot`, if the slot is live.
    #[inline]
    pub fn tag_of(&self, slot: Slot) -> Option<Tag> {
        self.slot_to_tag.get(&slot).copied()
    }

    pub fn contains_tag(&self, tag: Tag) -> bool {
        self.tag_to_slot.contains_key(&tag)
    }

    /// Bind `tag` to `slot`. Fails if the tag is already live.
    pub fn bind(&mut self, tag: Tag, slot: Slot) -> Result<()> {
        if self.tag_to_slot.contains_key(&tag) {
            return Err(IndexError::DuplicateTag(tag));
        }
        self.tag_to_slot.insert(tag, slot);
        self.slot_to_tag.insert(slot, tag);
        Ok(())
    }

    /// Remove `tag` from the mapping, returning its slot. The slot is NOT
    /// returned to the free list; that happens at consolidation.
    pub fn unbind(&mut self, tag: Tag) -> Result<Slot> {
        let slot = self
            .tag_to_slot
            .remove(&tag)
            .ok_or(IndexError::UnknownTag(tag))?;
        self.slot_to_tag.remove(&slot);
        Ok(slot)
    }

    /// Take a recycled slot, if any are available.
    pub fn pop_free(&mut self) -> Option<Slot> {
        self.free_slots.pop()
    }

    /// Return a reclaimed slot for reuse by future inserts.
    pub fn push_free(&mut self, slot: Slot) {
        debug_assert!(!self.slot_to_tag.contains_key(&slot));
        self.free_slots.push(slot);
    }

    pub fn num_free(&self) -> usize {
        self.free_slots.len()
    }

    /// Iterate over live `(tag, slot)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (Tag, Slot)> + '_ {
        self.tag_to_slot.iter().map(|(&t, &s)| (t, s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_lookup() {
        let mut tags = TagMap::new();
        tags.bind(42, 0).unwrap();
        tags.bind(7, 1).unwrap();
        assert_eq!(tags.slot_of(42), Some(0));
        assert_eq!(tags.tag_of(1), Some(7));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let mut tags = TagMap::new();
        tags.bind(42, 0).unwrap();
        let err = tags.bind(42, 1).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateTag(42)));
        // Mapping unchanged.
        assert_eq!(tags.slot_of(42), Some(0));
    }

    #[test]
    fn test_unbind_then_free_then_reuse() {
        let mut tags = TagMap::new();
        tags.bind(42, 5).unwrap();
        let slot = tags.unbind(42).unwrap();
        assert_eq!(slot, 5);
        assert_eq!(tags.tag_of(5), None);

        tags.push_free(slot);
        assert_eq!(tags.pop_free(), Some(5));
        assert_eq!(tags.pop_free(), None);
    }

    #[test]
    fn test_unbind_unknown_tag() {
        let mut tags = TagMap::new();
        assert!(matches!(
            tags.unbind(99).unwrap_err(),
            IndexError::UnknownTag(99)
        ));
    }
}
