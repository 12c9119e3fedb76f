// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tick::Clock;
use tokio::runtime::Handle;
use toolkit_tier::{
    BackendEntry, CacheListener, ClusterBackend, ClusterNode, EntryMetadata, Error, ErrorKind, LockScope, TierLocation, codec,
    epoch_secs,
};

use crate::notifier::{CacheEvent, Notifier};
use crate::tiers::LocalTiers;
use crate::{BulkRemoval, StoreSettings};

/// A store whose entries live in a cluster backend and are cached in local tiers.
///
/// The backend is authoritative. Each node keeps a subset of the entries in
/// an on-heap tier bounded by entry count and, optionally, an off-heap tier
/// of serialized values bounded by bytes.
///
/// # Locked and unlocked operations
///
/// [`put`](Self::put), [`get`](Self::get) and [`remove`](Self::remove) take a
/// cluster lock on the key for the duration of the backend call, so they are
/// serialized with every other locked operation on that key. The
/// `unlocked_*` variants skip the lock entirely. They are not ordered against
/// each other or against locked operations; callers that need ordering must
/// hold their own lock.
///
/// # Local operations
///
/// Introspection such as [`local_size`](Self::local_size) and
/// [`unsafe_local_get`](Self::unsafe_local_get) never contacts the backend.
/// A local miss says nothing about whether the key exists in the cluster.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use tick::Clock;
/// use toolkit_store::{StoreSettings, TieredStore};
/// use toolkit_tier::EntryMetadata;
/// use toolkit_tier::testing::MockBackend;
///
/// # futures::executor::block_on(async {
/// let backend = Arc::new(MockBackend::new());
/// let store = TieredStore::<String, u32, _>::new("orders", backend, Clock::new_frozen(), StoreSettings::default())?;
///
/// store.put("a".to_owned(), 1, EntryMetadata::new(0)).await?;
/// assert_eq!(store.unsafe_local_get(&"a".to_owned())?, Some(1));
/// assert_eq!(store.local_size()?, 1);
/// # Ok::<(), toolkit_tier::Error>(())
/// # }).unwrap();
/// ```
pub struct TieredStore<K: Hash + Eq, V, B> {
    name: Arc<str>,
    backend: Arc<B>,
    clock: Clock,
    settings: StoreSettings,
    tiers: Mutex<LocalTiers<K, V>>,
    notifier: Notifier<K>,
    disposed: AtomicBool,
}

impl<K: Hash + Eq, V, B> std::fmt::Debug for TieredStore<K, V, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStore")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl<K, V, B> TieredStore<K, V, B>
where
    K: Clone + Hash + Eq + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    B: ClusterBackend,
{
    /// Creates a store named `name` on top of `backend`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the on-heap capacity is zero.
    pub fn new(name: impl Into<String>, backend: Arc<B>, clock: Clock, settings: StoreSettings) -> Result<Self, Error> {
        let name: Arc<str> = name.into().into();
        if settings.on_heap_capacity == 0 {
            return Err(Error::configuration(format!("store '{name}' needs an on-heap capacity of at least one entry")));
        }

        Ok(Self {
            tiers: Mutex::new(LocalTiers::new(
                settings.on_heap_capacity,
                settings.off_heap_capacity_bytes,
                settings.expiry,
            )),
            notifier: Notifier::new(Arc::clone(&name)),
            name,
            backend,
            clock,
            settings,
            disposed: AtomicBool::new(false),
        })
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Returns the settings the store was created with.
    #[must_use]
    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    /// Returns `true` once [`dispose_locally`](Self::dispose_locally) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Writes an entry under the key's cluster lock, returning the previous value.
    ///
    /// The key and value are serialized before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn put(&self, key: K, value: V, metadata: EntryMetadata) -> Result<Option<V>, Error> {
        self.put_locked(key, value, metadata)
            .await?
            .map(|previous| codec::decode(previous.value()))
            .transpose()
    }

    /// Like [`put`](Self::put) without decoding the previous value.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn put_no_return(&self, key: K, value: V, metadata: EntryMetadata) -> Result<(), Error> {
        self.put_locked(key, value, metadata).await.map(drop)
    }

    /// Reads an entry from the backend under the key's cluster lock and caches it locally.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn get(&self, key: &K) -> Result<Option<V>, Error> {
        self.ensure_live()?;
        let key_bytes = codec::encode(key)?;

        let lock = HeldLock::acquire(&self.backend, LockScope::key(&*self.name, key_bytes.clone())).await?;
        let result = match self.backend.get(&self.name, &key_bytes, lock.scope()).await {
            Ok(entry) => self.absorb(key, entry),
            Err(error) => Err(error),
        };
        lock.release().await;
        result
    }

    /// Removes an entry under the key's cluster lock, returning the previous value.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn remove(&self, key: &K) -> Result<Option<V>, Error> {
        self.remove_locked(key)
            .await?
            .map(|previous| codec::decode(previous.value()))
            .transpose()
    }

    /// Writes an entry without taking a lock or reading the previous value.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn unlocked_put_no_return(&self, key: K, value: V, metadata: EntryMetadata) -> Result<(), Error> {
        self.ensure_live()?;
        let (key_bytes, value_bytes) = encode_pair(&key, &value)?;
        let size = value_bytes.len();

        self.backend
            .put(&self.name, key_bytes, BackendEntry::new(value_bytes, metadata), None)
            .await?;
        self.install(key, value, metadata, size);
        Ok(())
    }

    /// Removes an entry without taking a lock or reading the previous value.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn unlocked_remove_no_return(&self, key: &K) -> Result<(), Error> {
        self.ensure_live()?;
        let key_bytes = codec::encode(key)?;

        self.backend.remove(&self.name, &key_bytes, None).await?;
        self.with_tiers(|tiers| tiers.discard(key));
        Ok(())
    }

    /// Reads an entry without taking a lock, trying the local tiers first.
    ///
    /// A `quiet` read does not count as an access: it leaves LRU order,
    /// idle time and tier placement alone, and a value fetched from the
    /// backend is returned without being cached.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn unlocked_get(&self, key: &K, quiet: bool) -> Result<Option<V>, Error> {
        self.ensure_live()?;
        let now = self.now();
        if let Some(value) = self.with_tiers(|tiers| tiers.read(key, quiet, now))? {
            return Ok(Some(value));
        }

        let key_bytes = codec::encode(key)?;
        let entry = self.backend.get(&self.name, &key_bytes, None).await?;
        if quiet {
            return entry.map(|entry| codec::decode(entry.value())).transpose();
        }
        self.absorb(key, entry)
    }

    /// Reads a value only if this node holds it; never contacts the backend.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, or a not-serializable
    /// error if an off-heap value cannot be decoded.
    pub fn unsafe_local_get(&self, key: &K) -> Result<Option<V>, Error> {
        self.ensure_live()?;
        let now = self.now();
        self.with_tiers(|tiers| tiers.read(key, false, now))
    }

    /// Returns `true` if this node holds the key in either tier.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn contains_local_key(&self, key: &K) -> Result<bool, Error> {
        self.inspect(|tiers| tiers.contains(key))
    }

    /// Returns `true` if the key is in the on-heap tier.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn contains_key_local_on_heap(&self, key: &K) -> Result<bool, Error> {
        self.inspect(|tiers| tiers.contains_on_heap(key))
    }

    /// Returns `true` if the key is in the off-heap tier.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn contains_key_local_off_heap(&self, key: &K) -> Result<bool, Error> {
        self.inspect(|tiers| tiers.contains_off_heap(key))
    }

    /// Returns the number of locally held entries.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_size(&self) -> Result<usize, Error> {
        self.inspect(LocalTiers::len)
    }

    /// Returns a snapshot of the locally held keys.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_key_set(&self) -> Result<HashSet<K>, Error> {
        self.inspect(LocalTiers::keys)
    }

    /// Returns the number of on-heap entries.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_on_heap_size(&self) -> Result<usize, Error> {
        self.inspect(LocalTiers::on_heap_len)
    }

    /// Returns the serialized size of the on-heap values.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_on_heap_size_in_bytes(&self) -> Result<usize, Error> {
        self.inspect(LocalTiers::on_heap_bytes)
    }

    /// Returns the number of off-heap entries.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_off_heap_size(&self) -> Result<usize, Error> {
        self.inspect(LocalTiers::off_heap_len)
    }

    /// Returns the size of the off-heap values.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_off_heap_size_in_bytes(&self) -> Result<usize, Error> {
        self.inspect(LocalTiers::off_heap_bytes)
    }

    /// Reports where the key currently lives.
    ///
    /// Only asks the backend when the key is not held locally.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn tier_location(&self, key: &K) -> Result<TierLocation, Error> {
        if let Some(location) = self.inspect(|tiers| tiers.location(key))? {
            return Ok(location);
        }

        let key_bytes = codec::encode(key)?;
        Ok(match self.backend.get(&self.name, &key_bytes, None).await? {
            Some(_) => TierLocation::RemoteOnly,
            None => TierLocation::Absent,
        })
    }

    /// Drops every local entry; the cluster copy is untouched.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn clear_local_cache(&self) -> Result<(), Error> {
        self.ensure_live()?;
        self.with_tiers(LocalTiers::clear);
        Ok(())
    }

    /// Removes each key under its own lock and reports per-key outcomes.
    ///
    /// Keys removed before a failure stay removed. Once the cluster becomes
    /// unreachable partway through, the key that hit it and every key not yet
    /// attempted are reported as cluster-unavailable failures.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, or a
    /// cluster-unavailable error when the cluster cannot be reached for the
    /// first key, before anything was changed. Other failures are reported
    /// per key in the [`BulkRemoval`].
    pub async fn remove_all(&self, keys: impl IntoIterator<Item = K>) -> Result<BulkRemoval<K>, Error> {
        self.ensure_live()?;

        let mut outcome = BulkRemoval::default();
        let mut keys = keys.into_iter();
        let mut attempted = false;
        while let Some(key) = keys.next() {
            match self.remove_locked(&key).await {
                Err(error) if error.kind() == ErrorKind::ClusterUnavailable => {
                    if !attempted {
                        return Err(error);
                    }
                    outcome.record(key, Err(error));
                    for skipped in keys.by_ref() {
                        outcome.record(skipped, Err(Error::cluster_unavailable("not attempted: the cluster became unreachable")));
                    }
                }
                removed => outcome.record(key, removed.map(drop)),
            }
            attempted = true;
        }
        Ok(outcome)
    }

    /// Releases this node's resources for the store.
    ///
    /// Local entries and listeners are dropped and every later call on this
    /// instance fails. The cluster copy and other instances are unaffected.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error if the store was already disposed.
    pub fn dispose_locally(&self) -> Result<(), Error> {
        let mut tiers = self.tiers.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(self.disposed_error());
        }
        tiers.clear();
        drop(tiers);

        self.notifier.close();
        tracing::event!(name: "toolkit.store.disposed", tracing::Level::INFO, store.name = &*self.name);
        Ok(())
    }

    /// Maps each key to the cluster nodes holding it locally, including this one.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn nodes_with_keys(&self, keys: &[K]) -> Result<HashMap<K, HashSet<ClusterNode>>, Error> {
        self.ensure_live()?;
        let encoded = keys.iter().map(codec::encode).collect::<Result<Vec<_>, _>>()?;

        let mut remote = self.backend.nodes_with_keys(&self.name, &encoded).await?;
        let resident = self.inspect(|tiers| keys.iter().map(|key| tiers.contains(key)).collect::<Vec<_>>())?;
        let local = self.backend.local_node();

        Ok(keys
            .iter()
            .zip(&encoded)
            .zip(resident)
            .map(|((key, key_bytes), resident)| {
                let mut nodes = remote.remove(key_bytes).unwrap_or_default();
                if resident {
                    nodes.insert(local.clone());
                }
                (key.clone(), nodes)
            })
            .collect())
    }

    /// Returns every cluster entry matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, a not-serializable
    /// error, or the backend's error.
    pub async fn search(&self, predicate: impl Fn(&K, &V) -> bool) -> Result<Vec<(K, V)>, Error> {
        self.ensure_live()?;

        let mut matches = Vec::new();
        for (key, entry) in self.backend.scan(&self.name).await? {
            let key: K = codec::decode(&key)?;
            let value: V = codec::decode(entry.value())?;
            if predicate(&key, &value) {
                matches.push((key, value));
            }
        }
        Ok(matches)
    }

    /// Returns every unexpired local entry matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, or a not-serializable
    /// error if an off-heap value cannot be decoded.
    pub fn local_search(&self, predicate: impl Fn(&K, &V) -> bool) -> Result<Vec<(K, V)>, Error> {
        let now = self.now();
        let mut entries = self.inspect(|tiers| tiers.entries(now))??;
        entries.retain(|(key, value)| predicate(key, value));
        Ok(entries)
    }

    /// Caches a value locally without telling the backend.
    ///
    /// The write is not durable and is invisible to other nodes.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, or a not-serializable error.
    pub fn local_put(&self, key: K, value: V, metadata: EntryMetadata) -> Result<(), Error> {
        self.ensure_live()?;
        let size = codec::encode(&value)?.len();
        self.install(key, value, metadata, size);
        Ok(())
    }

    /// Drops a local copy without telling the backend, returning it.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, or a not-serializable
    /// error if an off-heap value cannot be decoded.
    pub fn local_remove(&self, key: &K) -> Result<Option<V>, Error> {
        self.ensure_live()?;
        self.with_tiers(|tiers| tiers.remove(key))
    }

    /// Drops the local copies of `keys` without telling the backend.
    ///
    /// Every key is reported as removed, whether or not it was held.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_remove_all(&self, keys: impl IntoIterator<Item = K>) -> Result<BulkRemoval<K>, Error> {
        self.ensure_live()?;

        let mut outcome = BulkRemoval::default();
        self.with_tiers(|tiers| {
            for key in keys {
                tiers.discard(&key);
                outcome.record(key, Ok(()));
            }
        });
        Ok(outcome)
    }

    /// Reads a local value without counting as an access; never contacts the backend.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal, or a not-serializable
    /// error if an off-heap value cannot be decoded.
    pub fn local_peek(&self, key: &K) -> Result<Option<V>, Error> {
        self.ensure_live()?;
        let now = self.now();
        self.with_tiers(|tiers| tiers.read(key, true, now))
    }

    /// Reports the local tier holding the key, or [`TierLocation::Absent`].
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_tier_location(&self, key: &K) -> Result<TierLocation, Error> {
        self.inspect(|tiers| tiers.location(key).unwrap_or_default())
    }

    /// Registers a listener for eviction and expiration of local entries.
    ///
    /// Listeners run on a notifier task, never on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal or outside a tokio runtime.
    pub fn add_listener(&self, listener: Arc<dyn CacheListener<K>>) -> Result<(), Error> {
        self.ensure_live()?;
        self.notifier.subscribe(listener)
    }

    /// Unregisters a listener; returns whether it was registered.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn remove_listener(&self, listener: &Arc<dyn CacheListener<K>>) -> Result<bool, Error> {
        self.ensure_live()?;
        Ok(self.notifier.unsubscribe(listener))
    }

    /// Pauses capacity eviction; the tiers may grow past their limits.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn disable_eviction(&self) -> Result<(), Error> {
        self.ensure_live()?;
        self.with_tiers(|tiers| tiers.set_eviction_enabled(false));
        Ok(())
    }

    /// Resumes capacity eviction, immediately trimming the tiers back to their limits.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn enable_eviction(&self) -> Result<(), Error> {
        self.ensure_live()?;
        self.with_tiers(|tiers| tiers.set_eviction_enabled(true));
        Ok(())
    }

    /// Returns `true` unless eviction is paused.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn is_eviction_enabled(&self) -> Result<bool, Error> {
        self.inspect(LocalTiers::eviction_enabled)
    }

    /// Drops every expired local entry now instead of on next access.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn evict_expired(&self) -> Result<usize, Error> {
        self.ensure_live()?;
        let now = self.now();
        Ok(self.with_tiers(|tiers| tiers.sweep_expired(now)))
    }

    async fn put_locked(&self, key: K, value: V, metadata: EntryMetadata) -> Result<Option<BackendEntry>, Error> {
        self.ensure_live()?;
        let (key_bytes, value_bytes) = encode_pair(&key, &value)?;
        let size = value_bytes.len();

        let lock = HeldLock::acquire(&self.backend, LockScope::key(&*self.name, key_bytes.clone())).await?;
        let result = self
            .backend
            .put(&self.name, key_bytes, BackendEntry::new(value_bytes, metadata), lock.scope())
            .await;
        if result.is_ok() {
            self.install(key, value, metadata, size);
        }
        lock.release().await;
        result
    }

    async fn remove_locked(&self, key: &K) -> Result<Option<BackendEntry>, Error> {
        self.ensure_live()?;
        let key_bytes = codec::encode(key)?;

        let lock = HeldLock::acquire(&self.backend, LockScope::key(&*self.name, key_bytes.clone())).await?;
        let result = self.backend.remove(&self.name, &key_bytes, lock.scope()).await;
        if result.is_ok() {
            self.with_tiers(|tiers| tiers.discard(key));
        }
        lock.release().await;
        result
    }

    /// Mirrors a backend answer locally: cache a hit, drop a stale copy on a miss.
    fn absorb(&self, key: &K, entry: Option<BackendEntry>) -> Result<Option<V>, Error> {
        let Some(entry) = entry else {
            self.with_tiers(|tiers| tiers.discard(key));
            return Ok(None);
        };

        let value: V = codec::decode(entry.value())?;
        self.install(key.clone(), value.clone(), entry.metadata(), entry.value().len());
        Ok(Some(value))
    }

    fn install(&self, key: K, value: V, metadata: EntryMetadata, size: usize) {
        let now = self.now();
        self.with_tiers(|tiers| {
            // Disposal clears the tiers under the same lock.
            if !self.is_disposed() {
                tiers.install(key, value, metadata, size, now);
            }
        });
    }

    fn inspect<R>(&self, f: impl FnOnce(&LocalTiers<K, V>) -> R) -> Result<R, Error> {
        self.ensure_live()?;
        Ok(f(&*self.tiers.lock()))
    }

    fn with_tiers<R>(&self, f: impl FnOnce(&mut LocalTiers<K, V>) -> R) -> R {
        let mut tiers = self.tiers.lock();
        let result = f(&mut *tiers);
        // Publishing never blocks; doing it under the lock keeps events in occurrence order.
        self.report(tiers.take_events());
        result
    }

    fn report(&self, events: Vec<CacheEvent<K>>) {
        if events.is_empty() {
            return;
        }

        let evicted = events.iter().filter(|event| matches!(event, CacheEvent::Evicted(_))).count();
        tracing::event!(
            name: "toolkit.store.dropped",
            tracing::Level::DEBUG,
            store.name = &*self.name,
            store.evicted = evicted,
            store.expired = events.len() - evicted,
        );
        self.notifier.publish(events);
    }

    fn now(&self) -> u32 {
        epoch_secs(self.clock.system_time())
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.is_disposed() {
            Err(self.disposed_error())
        } else {
            Ok(())
        }
    }

    fn disposed_error(&self) -> Error {
        Error::illegal_state(format!("store '{}' has been disposed on this node", self.name))
    }
}

fn encode_pair<K: Serialize, V: Serialize>(key: &K, value: &V) -> Result<(Bytes, Bytes), Error> {
    Ok((codec::encode(key)?, codec::encode(value)?))
}

/// A cluster lock that is released when dropped, if not released explicitly.
///
/// Dropping happens when a call is abandoned mid-flight, for example after a
/// timeout; the release then runs on a background task.
struct HeldLock<B: ClusterBackend> {
    backend: Arc<B>,
    scope: Option<LockScope>,
}

impl<B: ClusterBackend> HeldLock<B> {
    async fn acquire(backend: &Arc<B>, scope: LockScope) -> Result<Self, Error> {
        backend.acquire_lock(&scope).await?;
        Ok(Self {
            backend: Arc::clone(backend),
            scope: Some(scope),
        })
    }

    fn scope(&self) -> Option<&LockScope> {
        self.scope.as_ref()
    }

    /// Releases the lock. A failed release is logged, never reported to the caller.
    ///
    /// The scope stays set until the backend answers, so a call dropped while
    /// the release is in flight still releases the lock from [`Drop`].
    async fn release(mut self) {
        let Some(scope) = self.scope.clone() else {
            return;
        };
        let released = self.backend.release_lock(&scope).await;
        self.scope = None;
        if let Err(error) = released {
            tracing::warn!(lock.cache = scope.cache_name(), %error, "failed to release cluster lock");
        }
    }
}

impl<B: ClusterBackend> Drop for HeldLock<B> {
    fn drop(&mut self) {
        let Some(scope) = self.scope.take() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(lock.cache = scope.cache_name(), "abandoned cluster lock could not be released without a runtime");
            return;
        };

        let backend = Arc::clone(&self.backend);
        runtime.spawn(async move {
            if let Err(error) = backend.release_lock(&scope).await {
                tracing::warn!(lock.cache = scope.cache_name(), %error, "failed to release abandoned cluster lock");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tick::ClockControl;
    use toolkit_tier::ExpiryDefaults;
    use toolkit_tier::testing::{BackendOp, MockBackend};

    use super::*;

    type Store = TieredStore<String, String, MockBackend>;

    fn store_with(backend: &MockBackend, settings: StoreSettings) -> Store {
        TieredStore::new("orders", Arc::new(backend.clone()), Clock::new_frozen(), settings).unwrap()
    }

    fn store(backend: &MockBackend) -> Store {
        store_with(backend, StoreSettings::default())
    }

    fn meta() -> EntryMetadata {
        EntryMetadata::new(0)
    }

    fn key(k: &str) -> String {
        k.to_owned()
    }

    #[test]
    fn zero_on_heap_capacity_is_rejected() {
        let settings = StoreSettings {
            on_heap_capacity: 0,
            ..StoreSettings::default()
        };
        let err = TieredStore::<String, String, _>::new("orders", Arc::new(MockBackend::new()), Clock::new_frozen(), settings)
            .unwrap_err();
        assert_eq!(err.kind(), toolkit_tier::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn locked_operations_hold_and_release_the_key_lock() {
        let backend = MockBackend::new();
        let store = store(&backend);

        assert_eq!(store.put(key("a"), "1".into(), meta()).await.unwrap(), None);
        assert_eq!(store.put(key("a"), "2".into(), meta()).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get(&key("a")).await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.remove(&key("a")).await.unwrap().as_deref(), Some("2"));

        let ops = backend.operations();
        let locked_data_ops = ops
            .iter()
            .filter(|op| {
                matches!(
                    op,
                    BackendOp::Put { locked: true, .. } | BackendOp::Get { locked: true, .. } | BackendOp::Remove { locked: true, .. }
                )
            })
            .count();
        assert_eq!(locked_data_ops, 4);
        assert_eq!(ops.iter().filter(|op| matches!(op, BackendOp::AcquireLock(_))).count(), 4);
        assert_eq!(ops.iter().filter(|op| matches!(op, BackendOp::ReleaseLock(_))).count(), 4);

        let scope = LockScope::key("orders", codec::encode(&key("a")).unwrap());
        assert!(!backend.is_locked(&scope));
        assert!(!store.contains_local_key(&key("a")).unwrap());
    }

    #[tokio::test]
    async fn failed_lock_release_keeps_the_committed_result() {
        let backend = MockBackend::new();
        let store = store(&backend);
        backend.fail_when(|op| matches!(op, BackendOp::ReleaseLock(_)));

        assert_eq!(store.put(key("a"), "1".into(), meta()).await.unwrap(), None);
        assert!(backend.entry("orders", &codec::encode(&key("a")).unwrap()).is_some());
        assert!(store.contains_local_key(&key("a")).unwrap());
    }

    #[tokio::test]
    async fn unlocked_operations_skip_locks() {
        let backend = MockBackend::new();
        let store = store(&backend);

        store.unlocked_put_no_return(key("a"), "1".into(), meta()).await.unwrap();
        store.unlocked_remove_no_return(&key("a")).await.unwrap();

        assert!(
            backend
                .operations()
                .iter()
                .all(|op| !matches!(op, BackendOp::AcquireLock(_) | BackendOp::ReleaseLock(_)))
        );
        assert_eq!(backend.entry_count("orders"), 0);
    }

    #[tokio::test]
    async fn failed_backend_write_leaves_local_tiers_alone() {
        let backend = MockBackend::new();
        let store = store(&backend);
        backend.fail_when(|op| matches!(op, BackendOp::Put { .. }));

        let err = store.put(key("a"), "1".into(), meta()).await.unwrap_err();
        assert_eq!(err.kind(), toolkit_tier::ErrorKind::Backend);
        assert!(!store.contains_local_key(&key("a")).unwrap());
        assert!(!backend.is_locked(&LockScope::key("orders", codec::encode(&key("a")).unwrap())));
    }

    #[tokio::test]
    async fn unlocked_get_prefers_local_then_caches_backend_hits() {
        let backend = MockBackend::new();
        let store = store(&backend);
        backend.seed(
            "orders",
            codec::encode(&key("a")).unwrap(),
            BackendEntry::new(codec::encode("remote").unwrap(), meta()),
        );

        assert_eq!(store.unlocked_get(&key("a"), true).await.unwrap().as_deref(), Some("remote"));
        assert!(!store.contains_local_key(&key("a")).unwrap(), "quiet reads do not cache");

        assert_eq!(store.unlocked_get(&key("a"), false).await.unwrap().as_deref(), Some("remote"));
        assert!(store.contains_key_local_on_heap(&key("a")).unwrap());

        backend.clear_operations();
        assert_eq!(store.unlocked_get(&key("a"), false).await.unwrap().as_deref(), Some("remote"));
        assert!(backend.operations().is_empty());
    }

    #[tokio::test]
    async fn tier_location_distinguishes_remote_and_absent() {
        let backend = MockBackend::new();
        let store = store(&backend);
        backend.seed(
            "orders",
            codec::encode(&key("remote")).unwrap(),
            BackendEntry::new(codec::encode("v").unwrap(), meta()),
        );
        store.local_put(key("local"), "v".into(), meta()).unwrap();

        assert_eq!(store.tier_location(&key("local")).await.unwrap(), TierLocation::OnHeap);
        assert_eq!(store.tier_location(&key("remote")).await.unwrap(), TierLocation::RemoteOnly);
        assert_eq!(store.tier_location(&key("none")).await.unwrap(), TierLocation::Absent);
    }

    #[tokio::test]
    async fn local_fallbacks_never_reach_the_backend() {
        let backend = MockBackend::new();
        let store = store(&backend);

        store.local_put(key("a"), "1".into(), meta()).unwrap();
        assert_eq!(store.local_remove(&key("a")).unwrap().as_deref(), Some("1"));
        assert_eq!(store.local_remove(&key("a")).unwrap(), None);
        assert!(backend.operations().is_empty());
        assert_eq!(backend.entry_count("orders"), 0);
    }

    #[tokio::test]
    async fn local_bulk_and_peek_stay_local() {
        let backend = MockBackend::new();
        let store = store_with(
            &backend,
            StoreSettings {
                on_heap_capacity: 2,
                ..StoreSettings::default()
            },
        );
        store.local_put(key("a"), "1".into(), meta()).unwrap();
        store.local_put(key("b"), "2".into(), meta()).unwrap();

        assert_eq!(store.local_peek(&key("a")).unwrap().as_deref(), Some("1"));
        store.local_put(key("c"), "3".into(), meta()).unwrap();
        assert_eq!(store.local_tier_location(&key("a")).unwrap(), TierLocation::Absent);
        assert_eq!(store.local_tier_location(&key("b")).unwrap(), TierLocation::OnHeap);

        let outcome = store.local_remove_all([key("b"), key("z")]).unwrap();
        assert_eq!(outcome.removed(), [key("b"), key("z")]);
        assert_eq!(store.local_key_set().unwrap(), HashSet::from([key("c")]));
        assert!(backend.operations().is_empty());
    }

    #[tokio::test]
    async fn nodes_with_keys_adds_this_node_for_resident_keys() {
        let backend = MockBackend::new();
        let store = store(&backend);
        let peer = ClusterNode::new("peer");
        backend.mark_resident("orders", codec::encode(&key("a")).unwrap(), peer.clone());
        store.put(key("b"), "1".into(), meta()).await.unwrap();

        let nodes = store.nodes_with_keys(&[key("a"), key("b"), key("c")]).await.unwrap();
        assert_eq!(nodes[&key("a")], HashSet::from([peer]));
        assert_eq!(nodes[&key("b")], HashSet::from([backend.local_node()]));
        assert!(nodes[&key("c")].is_empty());
    }

    #[tokio::test]
    async fn search_filters_backend_and_local_entries() {
        let backend = MockBackend::new();
        let store = store(&backend);
        for (k, v) in [("a", "apple"), ("b", "banana"), ("c", "avocado")] {
            store.put(key(k), v.into(), meta()).await.unwrap();
        }
        store.clear_local_cache().unwrap();
        store.local_put(key("d"), "apricot".into(), meta()).unwrap();

        let mut remote = store.search(|_, v| v.starts_with('a')).await.unwrap();
        remote.sort();
        assert_eq!(remote, vec![(key("a"), "apple".into()), (key("c"), "avocado".into())]);

        let local = store.local_search(|_, v| v.starts_with('a')).unwrap();
        assert_eq!(local, vec![(key("d"), "apricot".into())]);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped_and_reported() {
        let control = ClockControl::new_at(std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let backend = MockBackend::new();
        let settings = StoreSettings {
            expiry: ExpiryDefaults { tti: 0, ttl: 60 },
            ..StoreSettings::default()
        };
        let store = TieredStore::<String, String, _>::new("orders", Arc::new(backend), control.to_clock(), settings).unwrap();
        let created = epoch_secs(control.to_clock().system_time());

        store.local_put(key("a"), "1".into(), EntryMetadata::new(created)).unwrap();
        store.local_put(key("b"), "2".into(), EntryMetadata::with_expiry(created, 0, 600)).unwrap();

        control.advance(Duration::from_secs(61));
        assert_eq!(store.unsafe_local_get(&key("a")).unwrap(), None);
        assert_eq!(store.unsafe_local_get(&key("b")).unwrap().as_deref(), Some("2"));

        control.advance(Duration::from_secs(600));
        assert_eq!(store.evict_expired().unwrap(), 1);
        assert_eq!(store.local_size().unwrap(), 0);
    }

    #[tokio::test]
    async fn eviction_can_be_paused() {
        let backend = MockBackend::new();
        let store = store_with(
            &backend,
            StoreSettings {
                on_heap_capacity: 2,
                ..StoreSettings::default()
            },
        );

        store.disable_eviction().unwrap();
        for k in ["a", "b", "c", "d"] {
            store.local_put(key(k), k.into(), meta()).unwrap();
        }
        assert_eq!(store.local_on_heap_size().unwrap(), 4);
        assert!(!store.is_eviction_enabled().unwrap());

        store.enable_eviction().unwrap();
        assert_eq!(store.local_on_heap_size().unwrap(), 2);
        assert_eq!(store.local_key_set().unwrap(), HashSet::from([key("c"), key("d")]));
    }

    #[tokio::test]
    async fn byte_accounting_follows_tiers() {
        let backend = MockBackend::new();
        let store = store_with(
            &backend,
            StoreSettings {
                on_heap_capacity: 1,
                off_heap_capacity_bytes: 1024,
                ..StoreSettings::default()
            },
        );
        let size = codec::encode("value").unwrap().len();

        store.local_put(key("a"), "value".into(), meta()).unwrap();
        store.local_put(key("b"), "value".into(), meta()).unwrap();

        assert_eq!(store.local_on_heap_size_in_bytes().unwrap(), size);
        assert_eq!(store.local_off_heap_size_in_bytes().unwrap(), size);
        assert!(store.contains_key_local_off_heap(&key("a")).unwrap());
        assert_eq!(store.local_off_heap_size().unwrap(), 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn second_dispose_fails() {
        let store = store(&MockBackend::new());
        store.dispose_locally().unwrap();
        assert!(logs_contain("store.name=\"orders\""));

        assert!(store.is_disposed());
        let err = store.dispose_locally().unwrap_err();
        assert_eq!(err.kind(), toolkit_tier::ErrorKind::IllegalState);
    }

    #[test]
    fn store_is_shareable_across_threads() {
        static_assertions::assert_impl_all!(Store: Send, Sync);
    }
}
