use std::cell::Cell;
use std::collections::BTreeMap;

use super::accumulator::Accumulator;
use super::key::Key;

/// Stable index of an accumulator slot inside one [`Table`].
///
/// Valid until the table is replaced; slots are never removed from a live
/// table, so a cached id survives any number of inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// Sparse map from key to accumulator, backed by a slot arena.
#[derive(Debug, Default)]
pub struct Table {
    index: BTreeMap<Key, SlotId>,
    slots: Vec<Accumulator>,
    lookups: Cell<u64>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of key lookups served since creation.
    pub fn lookups(&self) -> u64 {
        self.lookups.get()
    }

    pub fn find(&self, key: &Key) -> Option<SlotId> {
        self.lookups.set(self.lookups.get() + 1);
        self.index.get(key).copied()
    }

    pub fn get(&self, key: &Key) -> Option<&Accumulator> {
        self.find(key).map(|id| &self.slots[id.0])
    }

    /// Returns the slot for `key`, inserting `make()` when absent.
    pub fn entry_or_insert_with(
        &mut self,
        key: &Key,
        make: impl FnOnce() -> Accumulator,
    ) -> SlotId {
        if let Some(id) = self.find(key) {
            return id;
        }
        let id = SlotId(self.slots.len());
        self.slots.push(make());
        self.index.insert(key.clone(), id);
        id
    }

    /// Inserts or overwrites the accumulator for `key`.
    pub fn insert(&mut self, key: Key, acc: Accumulator) -> SlotId {
        self.lookups.set(self.lookups.get() + 1);
        match self.index.get(&key) {
            Some(&id) => {
                self.slots[id.0] = acc;
                id
            }
            None => {
                let id = SlotId(self.slots.len());
                self.slots.push(acc);
                self.index.insert(key, id);
                id
            }
        }
    }

    pub fn slot(&self, id: SlotId) -> &Accumulator {
        &self.slots[id.0]
    }

    pub fn slot_mut(&mut self, id: SlotId) -> &mut Accumulator {
        &mut self.slots[id.0]
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Accumulator)> {
        self.index.iter().map(|(k, id)| (k, &self.slots[id.0]))
    }

    /// Keys and slot ids in key order.
    pub fn slots(&self) -> impl Iterator<Item = (&Key, SlotId)> {
        self.index.iter().map(|(k, id)| (k, *id))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Key, &mut Accumulator)> {
        let index = &self.index;
        let mut slots: Vec<Option<&mut Accumulator>> = self.slots.iter_mut().map(Some).collect();
        index
            .iter()
            .filter_map(move |(k, id)| slots[id.0].take().map(|acc| (k, acc)))
    }

    /// Consumes the table, yielding entries in key order.
    pub fn into_entries(self) -> impl Iterator<Item = (Key, Accumulator)> {
        let mut slots: Vec<Option<Accumulator>> = self.slots.into_iter().map(Some).collect();
        self.index
            .into_iter()
            .filter_map(move |(k, id)| slots[id.0].take().map(|acc| (k, acc)))
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
    }
}
