// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-channel table binding in-flight requests to tagged message ids
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 8 unit tests (incl. proptest)
//!
//! Fixed capacity (256 slots), cyclic allocation: the search for a free slot starts right after
//! the previously issued one, so a just-released id is the last to be reused. Issued ids carry
//! MAGIC_VAL in their high byte; raw words read back from the device must pass
//! [`MsgId::validate`] before they index the table.

use core::fmt;

use crate::{Error, Result};

/// Number of concurrently live ids per channel.
pub const MAX_MSG_ID_ENTRIES: usize = 256;
/// Tag carried in the high byte of every issued id.
pub const MAGIC_VAL: u32 = 0x1D00_0000;
pub const MAGIC_VAL_MASK: u32 = 0xFF00_0000;

/// Tagged message id as it appears in the wire header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgId(u32);

impl MsgId {
    fn from_slot(slot: usize) -> Self {
        Self(MAGIC_VAL | slot as u32)
    }

    /// Accepts a raw word from the wire only if it carries the tag.
    pub fn validate(raw: u32) -> Option<Self> {
        (raw & MAGIC_VAL_MASK == MAGIC_VAL).then_some(Self(raw))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    fn slot(self) -> usize {
        (self.0 & !MAGIC_VAL_MASK) as usize
    }
}

impl fmt::Debug for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgId({:#010x})", self.0)
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub struct MsgIdTable<T> {
    slots: Vec<Option<T>>,
    next: usize,
    live: usize,
}

impl<T> MsgIdTable<T> {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_MSG_ID_ENTRIES);
        slots.resize_with(MAX_MSG_ID_ENTRIES, || None);
        Self { slots, next: 0, live: 0 }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores `value` under the next free id at or after the cursor, wrapping once.
    pub fn allocate(&mut self, value: T) -> Result<MsgId> {
        self.allocate_with(|_| value)
    }

    /// Like [`MsgIdTable::allocate`], for values that need to embed their own id.
    /// `make` is not called when the table is full.
    pub fn allocate_with(&mut self, make: impl FnOnce(MsgId) -> T) -> Result<MsgId> {
        let slot = (0..MAX_MSG_ID_ENTRIES)
            .map(|i| (self.next + i) % MAX_MSG_ID_ENTRIES)
            .find(|&s| self.slots[s].is_none())
            .ok_or(Error::IdExhausted)?;
        let id = MsgId::from_slot(slot);
        self.slots[slot] = Some(make(id));
        self.next = (slot + 1) % MAX_MSG_ID_ENTRIES;
        self.live += 1;
        Ok(id)
    }

    pub fn lookup(&self, id: MsgId) -> Option<&T> {
        self.slots.get(id.slot())?.as_ref()
    }

    /// Lookup-and-remove in one step; a second reply for the same id finds nothing.
    pub fn take(&mut self, id: MsgId) -> Option<T> {
        let value = self.slots.get_mut(id.slot())?.take()?;
        self.live -= 1;
        Some(value)
    }

    /// Frees `id` for reuse, dropping whatever was bound to it.
    pub fn release(&mut self, id: MsgId) {
        self.take(id);
    }

    pub fn for_each(&self, mut f: impl FnMut(MsgId, &T)) {
        for (slot, value) in self.slots.iter().enumerate() {
            if let Some(value) = value {
                f(MsgId::from_slot(slot), value);
            }
        }
    }

    /// Empties the table, returning every live binding in slot order.
    pub fn drain(&mut self) -> Vec<(MsgId, T)> {
        self.live = 0;
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, value)| value.take().map(|v| (MsgId::from_slot(slot), v)))
            .collect()
    }
}

impl<T> Default for MsgIdTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn ids_carry_tag_and_cycle() {
        let mut table = MsgIdTable::new();
        let a = table.allocate("a").unwrap();
        let b = table.allocate("b").unwrap();
        assert_eq!(a.raw(), MAGIC_VAL);
        assert_eq!(b.raw(), MAGIC_VAL | 1);

        table.release(a);
        // Cursor moves on; the freed slot 0 is not handed out again right away.
        let c = table.allocate("c").unwrap();
        assert_eq!(c.raw(), MAGIC_VAL | 2);
    }

    #[test]
    fn exhaustion_at_capacity() {
        let mut table = MsgIdTable::new();
        let ids: HashSet<u32> =
            (0..MAX_MSG_ID_ENTRIES).map(|i| table.allocate(i).unwrap().raw()).collect();
        assert_eq!(ids.len(), MAX_MSG_ID_ENTRIES);
        assert!(matches!(table.allocate(999), Err(Error::IdExhausted)));

        let freed = MsgId::validate(MAGIC_VAL | 17).unwrap();
        table.release(freed);
        assert_eq!(table.allocate(1000).unwrap(), freed);
        assert!(matches!(table.allocate(1001), Err(Error::IdExhausted)));
    }

    #[test]
    fn wraps_around_the_end() {
        let mut table = MsgIdTable::new();
        for i in 0..MAX_MSG_ID_ENTRIES {
            let id = table.allocate(i).unwrap();
            table.release(id);
        }
        assert_eq!(table.allocate(0).unwrap().raw(), MAGIC_VAL);
    }

    #[test]
    fn validate_rejects_untagged_words() {
        assert!(MsgId::validate(0x0000_0001).is_none());
        assert!(MsgId::validate(0xDEAD_FACE).is_none());
        assert!(MsgId::validate(MAGIC_VAL | 0x42).is_some());

        let table: MsgIdTable<u8> = MsgIdTable::new();
        // Tagged but outside the slot range.
        assert!(table.lookup(MsgId::validate(MAGIC_VAL | 0x1_0000).unwrap()).is_none());
    }

    #[test]
    fn allocate_with_sees_its_id() {
        let mut table = MsgIdTable::new();
        table.allocate(0).unwrap();
        let id = table.allocate_with(MsgId::raw).unwrap();
        assert_eq!(table.lookup(id), Some(&(MAGIC_VAL | 1)));
    }

    #[test]
    fn take_is_single_shot() {
        let mut table = MsgIdTable::new();
        let id = table.allocate(5u32).unwrap();
        assert_eq!(table.lookup(id), Some(&5));
        assert_eq!(table.take(id), Some(5));
        assert_eq!(table.take(id), None);
        assert!(table.is_empty());
    }

    #[test]
    fn drain_yields_all_live() {
        let mut table = MsgIdTable::new();
        for i in 0..5u32 {
            table.allocate(i).unwrap();
        }
        let mut seen = 0;
        table.for_each(|_, _| seen += 1);
        assert_eq!(seen, 5);
        let drained: Vec<u32> = table.drain().into_iter().map(|(_, v)| v).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
        assert_eq!(table.len(), 0);
    }

    proptest! {
        #[test]
        fn live_ids_stay_distinct(ops in proptest::collection::vec(any::<bool>(), 1..600)) {
            let mut table = MsgIdTable::new();
            let mut live: Vec<MsgId> = Vec::new();
            for alloc in ops {
                if alloc || live.is_empty() {
                    match table.allocate(()) {
                        Ok(id) => {
                            prop_assert!(!live.contains(&id));
                            live.push(id);
                        }
                        Err(_) => prop_assert_eq!(live.len(), MAX_MSG_ID_ENTRIES),
                    }
                } else {
                    let id = live.remove(0);
                    prop_assert!(table.take(id).is_some());
                }
                prop_assert_eq!(table.len(), live.len());
            }
        }
    }
}
