// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A single LRU-ordered local tier.

use std::hash::Hash;

use bytes::Bytes;
use lru::LruCache;
use toolkit_tier::CacheEntry;

/// How much a tier may hold before it has to give up entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Budget {
    /// At most this many entries.
    Entries(usize),
    /// At most this many serialized bytes.
    Bytes(usize),
}

/// A resident entry and the size of its serialized value.
#[derive(Debug, Clone)]
pub(crate) struct Slot<V> {
    pub(crate) entry: CacheEntry<V>,
    pub(crate) bytes: usize,
}

/// Live values, bounded by entry count.
pub(crate) type OnHeapTier<K, V> = Tier<K, V>;

/// Serialized values, bounded by their total size.
pub(crate) type OffHeapTier<K> = Tier<K, Bytes>;

/// LRU map with size accounting.
///
/// The underlying map is unbounded; the budget is only enforced when the
/// owner asks for victims through [`Tier::pop_over_budget`], so eviction can
/// be paused without losing entries.
pub(crate) struct Tier<K, V> {
    entries: LruCache<K, Slot<V>>,
    budget: Budget,
    bytes: usize,
}

impl<K: Hash + Eq, V> std::fmt::Debug for Tier<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("len", &self.entries.len())
            .field("bytes", &self.bytes)
            .field("budget", &self.budget)
            .finish()
    }
}

impl<K: Hash + Eq, V> Tier<K, V> {
    pub(crate) fn new(budget: Budget) -> Self {
        Self {
            entries: LruCache::unbounded(),
            budget,
            bytes: 0,
        }
    }

    /// Looks up a slot; only a non-quiet lookup moves it to the front.
    pub(crate) fn get_mut(&mut self, key: &K, quiet: bool) -> Option<&mut Slot<V>> {
        if quiet {
            self.entries.peek_mut(key)
        } else {
            self.entries.get_mut(key)
        }
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    /// Inserts at the front, returning the slot it replaced.
    pub(crate) fn insert(&mut self, key: K, slot: Slot<V>) -> Option<Slot<V>> {
        self.bytes += slot.bytes;
        let previous = self.entries.put(key, slot);
        if let Some(previous) = &previous {
            self.bytes -= previous.bytes;
        }
        previous
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<Slot<V>> {
        let removed = self.entries.pop(key)?;
        self.bytes -= removed.bytes;
        Some(removed)
    }

    /// Removes the least recently used entry while the tier exceeds its budget.
    pub(crate) fn pop_over_budget(&mut self) -> Option<(K, Slot<V>)> {
        let over = match self.budget {
            Budget::Entries(max) => self.entries.len() > max,
            Budget::Bytes(max) => self.bytes > max,
        };
        if !over {
            return None;
        }

        let (key, slot) = self.entries.pop_lru()?;
        self.bytes -= slot.bytes;
        Some((key, slot))
    }

    /// Removes every entry matching `predicate`, returning their keys.
    pub(crate) fn remove_where(&mut self, mut predicate: impl FnMut(&Slot<V>) -> bool) -> Vec<K>
    where
        K: Clone,
    {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, slot)| predicate(slot))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            self.remove(key);
        }
        doomed
    }

    /// Iterates from most to least recently used without touching the order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &Slot<V>)> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }
}
