//! Dual-indexed entry store.
//!
//! Entries live in a slot arena. Two indexes point into it:
//!
//!   by_key     — key → slot, for renewal lookups
//!   by_timeout — (expires_at, key) → slot, ordered, for the scheduler
//!
//! Every mutation goes through a method here that updates both indexes
//! together, so an entry's sort key is never changed while it sits in
//! by_timeout.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::time::Instant;

use crate::entry::{Entry, TimeoutKey};

type SlotId = usize;

#[derive(Debug, Default)]
pub struct EntryIndex {
    slots: Vec<Option<Entry>>,
    free: Vec<SlotId>,
    by_key: HashMap<Arc<str>, SlotId>,
    by_timeout: BTreeMap<TimeoutKey, SlotId>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.by_key.get(key).and_then(|&slot| self.slots[slot].as_ref())
    }

    /// Insert a new entry. Returns false, leaving the index untouched, if
    /// the key is already tracked.
    pub fn insert(&mut self, entry: Entry) -> bool {
        if self.by_key.contains_key(entry.key()) {
            return false;
        }

        let key = entry.shared_key().clone();
        let timeout_key = entry.timeout_key();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };

        self.by_key.insert(key, slot);
        self.by_timeout.insert(timeout_key, slot);
        true
    }

    /// Move an existing entry to a new expiration. Returns false if the key
    /// is not tracked.
    pub fn reschedule(&mut self, key: &str, expires_at: Instant, address: &str) -> bool {
        let Some(&slot) = self.by_key.get(key) else {
            return false;
        };
        let Some(entry) = self.slots[slot].as_mut() else {
            return false;
        };

        self.by_timeout.remove(&entry.timeout_key());
        entry.refresh(expires_at, address);
        self.by_timeout.insert(entry.timeout_key(), slot);
        true
    }

    /// Remove an entry by key from both indexes.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let slot = self.by_key.remove(key)?;
        let entry = self.slots[slot].take()?;
        self.by_timeout.remove(&entry.timeout_key());
        self.free.push(slot);
        Some(entry)
    }

    /// The entry that expires next.
    pub fn earliest(&self) -> Option<&Entry> {
        self.by_timeout
            .first_key_value()
            .and_then(|(_, &slot)| self.slots[slot].as_ref())
    }

    /// Remove and return the earliest entry if it has expired at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Entry> {
        let (timeout_key, &slot) = self.by_timeout.first_key_value()?;
        if timeout_key.expires_at > now {
            return None;
        }

        let (timeout_key, _) = self.by_timeout.pop_first()?;
        self.by_key.remove(&timeout_key.key);
        let entry = self.slots[slot].take()?;
        self.free.push(slot);
        Some(entry)
    }

    /// Keys in expiration order.
    pub fn keys_by_timeout(&self) -> impl Iterator<Item = &str> {
        self.by_timeout.keys().map(|k| &*k.key)
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        assert_eq!(self.by_key.len(), self.by_timeout.len());
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(live, self.by_key.len());
        for (tk, &slot) in &self.by_timeout {
            let entry = self.slots[slot].as_ref().expect("timeout index points at empty slot");
            assert_eq!(&entry.timeout_key(), tk);
            assert_eq!(self.by_key.get(entry.key()), Some(&slot));
        }
    }
}
