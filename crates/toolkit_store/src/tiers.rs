// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tier membership, demotion, promotion and expiry for one store's local data.

use std::collections::HashSet;
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;
use toolkit_tier::{CacheEntry, EntryMetadata, Error, ExpiryDefaults, TierLocation, codec};

use crate::notifier::CacheEvent;
use crate::tier::{Budget, OffHeapTier, OnHeapTier, Slot};

/// The on-heap and off-heap tiers of one store.
///
/// A key lives in at most one tier. Capacity pressure on the on-heap tier
/// demotes its least recently used entry off-heap; a non-quiet off-heap hit
/// promotes the entry back. An entry only counts as evicted once it leaves
/// both tiers. Evictions and expirations are collected as [`CacheEvent`]s
/// for the owner to publish after releasing its lock.
#[derive(Debug)]
pub(crate) struct LocalTiers<K: Hash + Eq, V> {
    on_heap: OnHeapTier<K, V>,
    off_heap: Option<OffHeapTier<K>>,
    expiry: ExpiryDefaults,
    eviction_enabled: bool,
    events: Vec<CacheEvent<K>>,
}

impl<K, V> LocalTiers<K, V>
where
    K: Clone + Hash + Eq,
    V: Clone + Serialize + DeserializeOwned,
{
    /// An `off_heap_bytes` of zero disables the off-heap tier.
    pub(crate) fn new(on_heap_entries: usize, off_heap_bytes: usize, expiry: ExpiryDefaults) -> Self {
        Self {
            on_heap: OnHeapTier::new(Budget::Entries(on_heap_entries)),
            off_heap: (off_heap_bytes > 0).then(|| OffHeapTier::new(Budget::Bytes(off_heap_bytes))),
            expiry,
            eviction_enabled: true,
            events: Vec::new(),
        }
    }

    /// Reads a local value, dropping it instead if it has expired.
    ///
    /// A quiet read leaves recency, access time and tier placement untouched.
    pub(crate) fn read(&mut self, key: &K, quiet: bool, now: u32) -> Result<Option<V>, Error> {
        let expiry = self.expiry;

        let expired = match self.on_heap.get_mut(key, quiet) {
            Some(slot) if slot.entry.is_expired(now, expiry) => true,
            Some(slot) => {
                if !quiet {
                    slot.entry.touch(now);
                }
                return Ok(Some(slot.entry.value().clone()));
            }
            None => false,
        };
        if expired {
            self.on_heap.remove(key);
            self.events.push(CacheEvent::Expired(key.clone()));
            return Ok(None);
        }

        let Some(off_heap) = self.off_heap.as_mut() else {
            return Ok(None);
        };
        let expired = match off_heap.get_mut(key, true) {
            Some(slot) if slot.entry.is_expired(now, expiry) => true,
            Some(slot) if quiet => return codec::decode(slot.entry.value()).map(Some),
            Some(_) => false,
            None => return Ok(None),
        };
        let Some(slot) = off_heap.remove(key) else {
            return Ok(None);
        };
        if expired {
            self.events.push(CacheEvent::Expired(key.clone()));
            return Ok(None);
        }

        let value: V = codec::decode(slot.entry.value())?;
        let mut entry = slot.entry.map(|_| value.clone());
        entry.touch(now);
        self.on_heap.insert(key.clone(), Slot { entry, bytes: slot.bytes });
        self.rebalance();
        Ok(Some(value))
    }

    /// Places a value on-heap, replacing any local copy.
    pub(crate) fn install(&mut self, key: K, value: V, metadata: EntryMetadata, bytes: usize, now: u32) {
        if let Some(off_heap) = self.off_heap.as_mut() {
            off_heap.remove(&key);
        }

        let mut entry = CacheEntry::new(value, metadata);
        entry.touch(now);
        self.on_heap.insert(key, Slot { entry, bytes });
        self.rebalance();
    }

    /// Removes and returns a local copy.
    pub(crate) fn remove(&mut self, key: &K) -> Result<Option<V>, Error> {
        if let Some(slot) = self.on_heap.remove(key) {
            return Ok(Some(slot.entry.into_value()));
        }
        match self.off_heap.as_mut().and_then(|tier| tier.remove(key)) {
            Some(slot) => codec::decode(slot.entry.value()).map(Some),
            None => Ok(None),
        }
    }

    /// Drops a local copy without decoding it; returns whether one existed.
    pub(crate) fn discard(&mut self, key: &K) -> bool {
        self.on_heap.remove(key).is_some() || self.off_heap.as_mut().and_then(|tier| tier.remove(key)).is_some()
    }

    fn rebalance(&mut self) {
        if !self.eviction_enabled {
            return;
        }

        while let Some((key, slot)) = self.on_heap.pop_over_budget() {
            self.demote(key, slot);
        }
        if let Some(off_heap) = self.off_heap.as_mut() {
            while let Some((key, _)) = off_heap.pop_over_budget() {
                self.events.push(CacheEvent::Evicted(key));
            }
        }
    }

    fn demote(&mut self, key: K, slot: Slot<V>) {
        let Some(off_heap) = self.off_heap.as_mut() else {
            self.events.push(CacheEvent::Evicted(key));
            return;
        };

        match codec::encode(slot.entry.value()) {
            Ok(bytes) => {
                let size = bytes.len();
                off_heap.insert(
                    key,
                    Slot {
                        entry: slot.entry.map(|_| bytes),
                        bytes: size,
                    },
                );
            }
            Err(error) => {
                tracing::debug!(%error, "value could not be moved off-heap and was dropped");
                self.events.push(CacheEvent::Evicted(key));
            }
        }
    }

    /// Drops every expired entry.
    pub(crate) fn sweep_expired(&mut self, now: u32) -> usize {
        let expiry = self.expiry;
        let mut expired = self.on_heap.remove_where(|slot| slot.entry.is_expired(now, expiry));
        if let Some(off_heap) = self.off_heap.as_mut() {
            expired.extend(off_heap.remove_where(|slot| slot.entry.is_expired(now, expiry)));
        }

        let count = expired.len();
        self.events.extend(expired.into_iter().map(CacheEvent::Expired));
        count
    }

    /// Snapshot of every unexpired local entry, without touching recency.
    pub(crate) fn entries(&self, now: u32) -> Result<Vec<(K, V)>, Error> {
        let mut entries: Vec<(K, V)> = self
            .on_heap
            .iter()
            .filter(|(_, slot)| !slot.entry.is_expired(now, self.expiry))
            .map(|(key, slot)| (key.clone(), slot.entry.value().clone()))
            .collect();

        if let Some(off_heap) = &self.off_heap {
            for (key, slot) in off_heap.iter().filter(|(_, slot)| !slot.entry.is_expired(now, self.expiry)) {
                entries.push((key.clone(), codec::decode(slot.entry.value())?));
            }
        }
        Ok(entries)
    }

    pub(crate) fn set_eviction_enabled(&mut self, enabled: bool) {
        self.eviction_enabled = enabled;
        self.rebalance();
    }

    pub(crate) fn eviction_enabled(&self) -> bool {
        self.eviction_enabled
    }

    pub(crate) fn location(&self, key: &K) -> Option<TierLocation> {
        if self.on_heap.contains(key) {
            Some(TierLocation::OnHeap)
        } else if self.contains_off_heap(key) {
            Some(TierLocation::OffHeap)
        } else {
            None
        }
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.location(key).is_some()
    }

    pub(crate) fn contains_on_heap(&self, key: &K) -> bool {
        self.on_heap.contains(key)
    }

    pub(crate) fn contains_off_heap(&self, key: &K) -> bool {
        self.off_heap.as_ref().is_some_and(|tier| tier.contains(key))
    }

    pub(crate) fn len(&self) -> usize {
        self.on_heap_len() + self.off_heap_len()
    }

    pub(crate) fn on_heap_len(&self) -> usize {
        self.on_heap.len()
    }

    pub(crate) fn on_heap_bytes(&self) -> usize {
        self.on_heap.bytes()
    }

    pub(crate) fn off_heap_len(&self) -> usize {
        self.off_heap.as_ref().map_or(0, OffHeapTier::len)
    }

    pub(crate) fn off_heap_bytes(&self) -> usize {
        self.off_heap.as_ref().map_or(0, OffHeapTier::bytes)
    }

    pub(crate) fn keys(&self) -> HashSet<K> {
        let on_heap = self.on_heap.iter().map(|(key, _)| key.clone());
        match &self.off_heap {
            Some(off_heap) => on_heap.chain(off_heap.iter().map(|(key, _)| key.clone())).collect(),
            None => on_heap.collect(),
        }
    }

    /// Empties both tiers without reporting evictions.
    pub(crate) fn clear(&mut self) {
        self.on_heap.clear();
        if let Some(off_heap) = self.off_heap.as_mut() {
            off_heap.clear();
        }
    }

    pub(crate) fn take_events(&mut self) -> Vec<CacheEvent<K>> {
        std::mem::take(&mut self.events)
    }
}
