// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use nonstop::{Completion, Invocation, NonStopExecutor, NonStopPolicy, ObjectKind, OperationClass};
use serde::Serialize;
use serde::de::DeserializeOwned;
use toolkit_store::{BulkRemoval, StoreSettings, TieredStore};
use toolkit_tier::{CacheListener, ClusterBackend, ClusterNode, EntryMetadata, Error, TierLocation, epoch_secs};

/// A cluster-coherent cache whose backend calls run under NonStop policies.
///
/// Every operation that crosses to the cluster is resolved against the
/// owning [`Toolkit`](crate::Toolkit)'s policy registry as an
/// [`ObjectKind::Cache`] call named after the method, for example `"get"` or
/// `"unlocked_put_no_return"`. Such operations return a [`Completion`]: its
/// [`path`](Completion::path) tells whether the cluster answered or the
/// policy substituted a local or empty result.
///
/// Local introspection never crosses to the cluster and returns plain values.
///
/// # Degraded outcomes
///
/// | Behavior         | Reads, searches            | Mutations, listener registration |
/// |------------------|----------------------------|----------------------------------|
/// | `Exception`      | cluster-unavailable error  | cluster-unavailable error        |
/// | `LocalReads`     | local tiers                | cluster-unavailable error        |
/// | `LocalMethods`   | local tiers                | applied locally, not durable     |
/// | `NoOp`           | empty result               | nothing happens                  |
pub struct ToolkitCache<K: Hash + Eq, V, B> {
    store: Arc<TieredStore<K, V, B>>,
    executor: NonStopExecutor,
}

impl<K: Hash + Eq, V, B> std::fmt::Debug for ToolkitCache<K, V, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolkitCache")
            .field("store", &self.store)
            .field("cancelled", &self.executor.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<K, V, B> ToolkitCache<K, V, B>
where
    K: Clone + Hash + Eq + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    B: ClusterBackend,
{
    pub(crate) fn new(store: Arc<TieredStore<K, V, B>>, executor: NonStopExecutor) -> Self {
        Self { store, executor }
    }

    /// Returns the cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Returns the sizing and expiry of the local tiers.
    #[must_use]
    pub fn settings(&self) -> StoreSettings {
        self.store.settings()
    }

    /// Returns a handle whose calls use `policy` instead of any registered one.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// use nonstop::{ExecutionPath, NonStopPolicy, TimeoutBehavior};
    /// use tick::Clock;
    /// use toolkit_cache::Toolkit;
    /// use toolkit_tier::testing::MockBackend;
    ///
    /// # futures::executor::block_on(async {
    /// let backend = MockBackend::new();
    /// let toolkit = Toolkit::new(backend.clone(), Clock::new_frozen());
    /// let cache = toolkit.cache::<String, u32>("orders").build()?;
    /// cache.put("a".to_owned(), 1).await?;
    ///
    /// backend.set_reachable(false);
    /// let lenient = Arc::new(NonStopPolicy::new(Duration::from_secs(1), TimeoutBehavior::LocalReads)?);
    /// let completion = cache.with_override(lenient).get(&"a".to_owned()).await?;
    ///
    /// assert_eq!(completion.path(), ExecutionPath::LocalReads);
    /// assert_eq!(completion.into_value(), Some(1));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// # }).unwrap();
    /// ```
    #[must_use]
    pub fn with_override(&self, policy: Arc<NonStopPolicy>) -> WithOverride<'_, K, V, B> {
        WithOverride {
            cache: self,
            policy: Some(policy),
        }
    }

    fn calls(&self) -> WithOverride<'_, K, V, B> {
        WithOverride { cache: self, policy: None }
    }

    /// Writes an entry under the key's cluster lock, returning the previous value.
    ///
    /// The entry is stamped with the current time and uses the cache's
    /// default expiry. Under `LocalMethods` the previous value is the local one.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal or shutdown, a
    /// not-serializable error, a cluster-unavailable error when the policy
    /// does not allow a fallback, or the backend's error.
    pub async fn put(&self, key: K, value: V) -> Result<Completion<Option<V>>, Error> {
        self.calls().put(key, value).await
    }

    /// Like [`put`](Self::put) with explicit creation time and expiry.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn put_with_metadata(&self, key: K, value: V, metadata: EntryMetadata) -> Result<Completion<Option<V>>, Error> {
        self.calls().put_with_metadata(key, value, metadata).await
    }

    /// Like [`put`](Self::put) without decoding the previous value.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn put_no_return(&self, key: K, value: V) -> Result<Completion<()>, Error> {
        self.calls().put_no_return(key, value).await
    }

    /// Reads an entry under the key's cluster lock.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn get(&self, key: &K) -> Result<Completion<Option<V>>, Error> {
        self.calls().get(key).await
    }

    /// Removes an entry under the key's cluster lock, returning the previous value.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn remove(&self, key: &K) -> Result<Completion<Option<V>>, Error> {
        self.calls().remove(key).await
    }

    /// Writes an entry without locking; see [`TieredStore::unlocked_put_no_return`].
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn unlocked_put_no_return(&self, key: K, value: V) -> Result<Completion<()>, Error> {
        self.calls().unlocked_put_no_return(key, value).await
    }

    /// Removes an entry without locking.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn unlocked_remove_no_return(&self, key: &K) -> Result<Completion<()>, Error> {
        self.calls().unlocked_remove_no_return(key).await
    }

    /// Reads without locking, local tiers first; `quiet` reads leave LRU order alone.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn unlocked_get(&self, key: &K, quiet: bool) -> Result<Completion<Option<V>>, Error> {
        self.calls().unlocked_get(key, quiet).await
    }

    /// Reports where the key lives.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn tier_location(&self, key: &K) -> Result<Completion<TierLocation>, Error> {
        self.calls().tier_location(key).await
    }

    /// Removes each key under its own lock, reporting per-key failures.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put); failures of individual keys are reported
    /// in the [`BulkRemoval`] instead.
    pub async fn remove_all(&self, keys: impl IntoIterator<Item = K>) -> Result<Completion<BulkRemoval<K>>, Error> {
        self.calls().remove_all(keys).await
    }

    /// Maps each key to the cluster nodes that hold it locally.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn nodes_with_keys(&self, keys: &[K]) -> Result<Completion<HashMap<K, HashSet<ClusterNode>>>, Error> {
        self.calls().nodes_with_keys(keys).await
    }

    /// Returns the cluster entries matching `predicate`, within the search timeout.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub async fn search(&self, predicate: impl Fn(&K, &V) -> bool) -> Result<Completion<Vec<(K, V)>>, Error> {
        self.calls().search(predicate).await
    }

    /// Registers a listener for eviction and expiration of local entries.
    ///
    /// Under `NoOp` the registration is skipped and the call still succeeds.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal or outside a tokio
    /// runtime, or the errors of [`put`](Self::put).
    pub async fn add_listener(&self, listener: Arc<dyn CacheListener<K>>) -> Result<Completion<()>, Error> {
        self.calls().add_listener(listener).await
    }

    /// Unregisters a listener; returns whether it was registered.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn remove_listener(&self, listener: &Arc<dyn CacheListener<K>>) -> Result<bool, Error> {
        self.store.remove_listener(listener)
    }

    /// Reads a value only if this node holds it.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn unsafe_local_get(&self, key: &K) -> Result<Option<V>, Error> {
        self.store.unsafe_local_get(key)
    }

    /// Returns `true` if this node holds the key.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn contains_local_key(&self, key: &K) -> Result<bool, Error> {
        self.store.contains_local_key(key)
    }

    /// Returns `true` if the key is on-heap.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn contains_key_local_on_heap(&self, key: &K) -> Result<bool, Error> {
        self.store.contains_key_local_on_heap(key)
    }

    /// Returns `true` if the key is off-heap.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn contains_key_local_off_heap(&self, key: &K) -> Result<bool, Error> {
        self.store.contains_key_local_off_heap(key)
    }

    /// Returns the number of locally held entries.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_size(&self) -> Result<usize, Error> {
        self.store.local_size()
    }

    /// Returns a snapshot of the locally held keys.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_key_set(&self) -> Result<HashSet<K>, Error> {
        self.store.local_key_set()
    }

    /// Returns the number of on-heap entries.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_on_heap_size(&self) -> Result<usize, Error> {
        self.store.local_on_heap_size()
    }

    /// Returns the serialized size of the on-heap values.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_on_heap_size_in_bytes(&self) -> Result<usize, Error> {
        self.store.local_on_heap_size_in_bytes()
    }

    /// Returns the number of off-heap entries.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_off_heap_size(&self) -> Result<usize, Error> {
        self.store.local_off_heap_size()
    }

    /// Returns the size of the off-heap values.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn local_off_heap_size_in_bytes(&self) -> Result<usize, Error> {
        self.store.local_off_heap_size_in_bytes()
    }

    /// Drops every local entry; the cluster copy is untouched.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn clear_local_cache(&self) -> Result<(), Error> {
        self.store.clear_local_cache()
    }

    /// Pauses capacity eviction.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn disable_eviction(&self) -> Result<(), Error> {
        self.store.disable_eviction()
    }

    /// Resumes capacity eviction.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn enable_eviction(&self) -> Result<(), Error> {
        self.store.enable_eviction()
    }

    /// Returns `true` unless eviction is paused.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn is_eviction_enabled(&self) -> Result<bool, Error> {
        self.store.is_eviction_enabled()
    }

    /// Drops every expired local entry now, returning how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after disposal.
    pub fn evict_expired(&self) -> Result<usize, Error> {
        self.store.evict_expired()
    }

    /// Releases this node's resources for the cache and aborts its in-flight calls.
    ///
    /// Other instances of the same cache, here or on other nodes, keep working.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error if the cache was already disposed.
    pub fn dispose_locally(&self) -> Result<(), Error> {
        self.store.dispose_locally()?;
        self.executor.cancellation_token().cancel();
        Ok(())
    }

    /// Returns `true` once the cache was disposed, directly or by toolkit shutdown.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.store.is_disposed()
    }

    fn stamp(&self) -> EntryMetadata {
        EntryMetadata::new(epoch_secs(self.executor.clock().system_time()))
    }

    fn local_nodes_with_keys(&self, keys: &[K]) -> Result<HashMap<K, HashSet<ClusterNode>>, Error> {
        let local = self.store.backend().local_node();
        keys.iter()
            .map(|key| {
                let nodes = if self.store.contains_local_key(key)? {
                    HashSet::from([local.clone()])
                } else {
                    HashSet::new()
                };
                Ok((key.clone(), nodes))
            })
            .collect()
    }
}

/// Cache calls that carry a per-call policy override.
///
/// Created by [`ToolkitCache::with_override`]. The override beats every
/// registered policy, including method-of-instance registrations; search
/// calls use its search timeout when it has one, otherwise its timeout.
#[derive(Debug)]
pub struct WithOverride<'a, K: Hash + Eq, V, B> {
    cache: &'a ToolkitCache<K, V, B>,
    policy: Option<Arc<NonStopPolicy>>,
}

impl<K, V, B> WithOverride<'_, K, V, B>
where
    K: Clone + Hash + Eq + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    B: ClusterBackend,
{
    fn invocation<'s>(&'s self, method: &'s str, class: OperationClass) -> Invocation<'s> {
        Invocation::new(ObjectKind::Cache, self.cache.name(), method, class).with_override(self.policy.clone())
    }

    /// See [`ToolkitCache::put`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn put(&self, key: K, value: V) -> Result<Completion<Option<V>>, Error> {
        self.put_with_metadata(key, value, self.cache.stamp()).await
    }

    /// See [`ToolkitCache::put_with_metadata`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn put_with_metadata(&self, key: K, value: V, metadata: EntryMetadata) -> Result<Completion<Option<V>>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("put", OperationClass::Mutation);
        self.cache
            .executor
            .execute(&invocation, store.put(key.clone(), value.clone(), metadata), || {
                let previous = store.local_peek(&key)?;
                store.local_put(key, value, metadata)?;
                Ok(previous)
            })
            .await
    }

    /// See [`ToolkitCache::put_no_return`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn put_no_return(&self, key: K, value: V) -> Result<Completion<()>, Error> {
        let store = &self.cache.store;
        let metadata = self.cache.stamp();
        let invocation = self.invocation("put_no_return", OperationClass::Mutation);
        self.cache
            .executor
            .execute(&invocation, store.put_no_return(key.clone(), value.clone(), metadata), || {
                store.local_put(key, value, metadata)
            })
            .await
    }

    /// See [`ToolkitCache::get`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn get(&self, key: &K) -> Result<Completion<Option<V>>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("get", OperationClass::Read);
        self.cache
            .executor
            .execute(&invocation, store.get(key), || store.unsafe_local_get(key))
            .await
    }

    /// See [`ToolkitCache::remove`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn remove(&self, key: &K) -> Result<Completion<Option<V>>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("remove", OperationClass::Mutation);
        self.cache
            .executor
            .execute(&invocation, store.remove(key), || store.local_remove(key))
            .await
    }

    /// See [`ToolkitCache::unlocked_put_no_return`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn unlocked_put_no_return(&self, key: K, value: V) -> Result<Completion<()>, Error> {
        let store = &self.cache.store;
        let metadata = self.cache.stamp();
        let invocation = self.invocation("unlocked_put_no_return", OperationClass::Mutation);
        self.cache
            .executor
            .execute(&invocation, store.unlocked_put_no_return(key.clone(), value.clone(), metadata), || {
                store.local_put(key, value, metadata)
            })
            .await
    }

    /// See [`ToolkitCache::unlocked_remove_no_return`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn unlocked_remove_no_return(&self, key: &K) -> Result<Completion<()>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("unlocked_remove_no_return", OperationClass::Mutation);
        self.cache
            .executor
            .execute(&invocation, store.unlocked_remove_no_return(key), || store.local_remove(key).map(drop))
            .await
    }

    /// See [`ToolkitCache::unlocked_get`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn unlocked_get(&self, key: &K, quiet: bool) -> Result<Completion<Option<V>>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("unlocked_get", OperationClass::Read);
        self.cache
            .executor
            .execute(&invocation, store.unlocked_get(key, quiet), || {
                if quiet { store.local_peek(key) } else { store.unsafe_local_get(key) }
            })
            .await
    }

    /// See [`ToolkitCache::tier_location`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn tier_location(&self, key: &K) -> Result<Completion<TierLocation>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("tier_location", OperationClass::Read);
        self.cache
            .executor
            .execute(&invocation, store.tier_location(key), || store.local_tier_location(key))
            .await
    }

    /// See [`ToolkitCache::remove_all`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::remove_all`].
    pub async fn remove_all(&self, keys: impl IntoIterator<Item = K>) -> Result<Completion<BulkRemoval<K>>, Error> {
        let store = &self.cache.store;
        let keys: Vec<K> = keys.into_iter().collect();
        let invocation = self.invocation("remove_all", OperationClass::Mutation);
        self.cache
            .executor
            .execute(&invocation, store.remove_all(keys.clone()), || store.local_remove_all(keys))
            .await
    }

    /// See [`ToolkitCache::nodes_with_keys`].
    ///
    /// Degraded reads only know about this node.
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn nodes_with_keys(&self, keys: &[K]) -> Result<Completion<HashMap<K, HashSet<ClusterNode>>>, Error> {
        let invocation = self.invocation("nodes_with_keys", OperationClass::Read);
        self.cache
            .executor
            .execute(&invocation, self.cache.store.nodes_with_keys(keys), || self.cache.local_nodes_with_keys(keys))
            .await
    }

    /// See [`ToolkitCache::search`].
    ///
    /// Degraded searches only see the local tiers.
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::put`].
    pub async fn search(&self, predicate: impl Fn(&K, &V) -> bool) -> Result<Completion<Vec<(K, V)>>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("search", OperationClass::Search);
        self.cache
            .executor
            .execute(&invocation, store.search(&predicate), || store.local_search(&predicate))
            .await
    }

    /// See [`ToolkitCache::add_listener`].
    ///
    /// # Errors
    ///
    /// Same as [`ToolkitCache::add_listener`].
    pub async fn add_listener(&self, listener: Arc<dyn CacheListener<K>>) -> Result<Completion<()>, Error> {
        let store = &self.cache.store;
        let invocation = self.invocation("add_listener", OperationClass::Registration);
        let confirmed = Arc::clone(&listener);
        let subscribe = async move {
            store.backend().subscribe(store.name()).await?;
            store.add_listener(confirmed)
        };
        self.cache
            .executor
            .execute(&invocation, subscribe, || store.add_listener(listener))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nonstop::{ExecutionPath, InvocationState, NonStopPolicyBuilder, TimeoutBehavior};
    use tick::Clock;
    use toolkit_tier::ErrorKind;
    use toolkit_tier::testing::{BackendOp, MockBackend};

    use super::*;
    use crate::Toolkit;

    type Cache = ToolkitCache<String, String, MockBackend>;

    fn setup(behavior: TimeoutBehavior) -> (MockBackend, Toolkit<MockBackend>, Cache) {
        let backend = MockBackend::new();
        let toolkit = Toolkit::new(backend.clone(), Clock::new_frozen());
        NonStopPolicyBuilder::new()
            .timeout(Duration::from_secs(5))
            .behavior(behavior)
            .apply(toolkit.registry())
            .unwrap();
        let cache = toolkit.cache("orders").build().unwrap();
        (backend, toolkit, cache)
    }

    fn key(k: &str) -> String {
        k.to_owned()
    }

    struct Ignore;

    impl CacheListener<String> for Ignore {
        fn on_eviction(&self, _key: &String) {}

        fn on_expiration(&self, _key: &String) {}
    }

    #[tokio::test]
    async fn healthy_cluster_completes_on_the_backend() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::Exception);

        let completion = cache.put(key("a"), "1".into()).await.unwrap();
        assert_eq!(completion.path(), ExecutionPath::Backend);
        assert_eq!(completion.state(), InvocationState::Completed);
        assert_eq!(cache.get(&key("a")).await.unwrap().into_value().as_deref(), Some("1"));
        assert_eq!(backend.entry_count("orders"), 1);
    }

    #[tokio::test]
    async fn exception_surfaces_cluster_unavailable() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::Exception);
        backend.set_reachable(false);

        let err = cache.get(&key("a")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClusterUnavailable);
    }

    #[tokio::test]
    async fn local_reads_serve_reads_and_fail_mutations() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::LocalReads);
        cache.put(key("a"), "1".into()).await.unwrap();
        backend.set_reachable(false);

        let read = cache.get(&key("a")).await.unwrap();
        assert_eq!(read.path(), ExecutionPath::LocalReads);
        assert_eq!(read.state(), InvocationState::BackendUnavailable);
        assert_eq!(read.into_value().as_deref(), Some("1"));

        let err = cache.put(key("b"), "2".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClusterUnavailable);
        assert!(!cache.contains_local_key(&key("b")).unwrap());
    }

    #[tokio::test]
    async fn local_methods_apply_mutations_locally() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::LocalMethods);
        backend.set_reachable(false);

        let put = cache.put(key("a"), "1".into()).await.unwrap();
        assert_eq!(put.path(), ExecutionPath::LocalNonDurable);
        assert_eq!(cache.unsafe_local_get(&key("a")).unwrap().as_deref(), Some("1"));

        let removed = cache.remove_all([key("a")]).await.unwrap();
        assert_eq!(removed.path(), ExecutionPath::LocalNonDurable);
        assert_eq!(removed.value().removed(), [key("a")]);
        assert_eq!(cache.local_size().unwrap(), 0);
        assert_eq!(backend.entry_count("orders"), 0);
    }

    #[tokio::test]
    async fn no_op_returns_empty_results() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::NoOp);
        cache.put(key("a"), "1".into()).await.unwrap();
        backend.set_reachable(false);

        let read = cache.get(&key("a")).await.unwrap();
        assert_eq!(read.path(), ExecutionPath::NoOp);
        assert_eq!(read.into_value(), None);
        assert_eq!(cache.tier_location(&key("b")).await.unwrap().into_value(), TierLocation::Absent);
        assert!(cache.search(|_, _| true).await.unwrap().into_value().is_empty());
    }

    #[tokio::test]
    async fn no_op_listener_registration_skips_the_listener() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::NoOp);
        backend.set_reachable(false);
        let listener: Arc<dyn CacheListener<String>> = Arc::new(Ignore);

        let completion = cache.add_listener(Arc::clone(&listener)).await.unwrap();
        assert_eq!(completion.path(), ExecutionPath::NoOp);
        assert!(!cache.remove_listener(&listener).unwrap());
    }

    #[tokio::test]
    async fn confirmed_listener_registration_subscribes_on_the_backend() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::Exception);
        let listener: Arc<dyn CacheListener<String>> = Arc::new(Ignore);

        cache.add_listener(Arc::clone(&listener)).await.unwrap();
        assert!(backend.operations().contains(&BackendOp::Subscribe("orders".into())));
        assert!(cache.remove_listener(&listener).unwrap());
    }

    #[tokio::test]
    async fn degraded_lookups_only_know_this_node() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::LocalReads);
        cache.put(key("a"), "apple".into()).await.unwrap();
        backend.set_reachable(false);

        let nodes = cache.nodes_with_keys(&[key("a"), key("b")]).await.unwrap().into_value();
        assert_eq!(nodes[&key("a")], HashSet::from([backend.local_node()]));
        assert!(nodes[&key("b")].is_empty());

        let location = cache.tier_location(&key("b")).await.unwrap();
        assert_eq!(location.path(), ExecutionPath::LocalReads);
        assert_eq!(location.into_value(), TierLocation::Absent);

        let found = cache.search(|_, v| v.starts_with('a')).await.unwrap().into_value();
        assert_eq!(found, vec![(key("a"), "apple".to_owned())]);
    }

    #[tokio::test]
    async fn override_beats_registered_policy() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::Exception);
        cache.put(key("a"), "1".into()).await.unwrap();
        backend.set_reachable(false);

        let policy = Arc::new(NonStopPolicy::new(Duration::from_secs(5), TimeoutBehavior::LocalReads).unwrap());
        let read = cache.with_override(policy).get(&key("a")).await.unwrap();
        assert_eq!(read.path(), ExecutionPath::LocalReads);

        assert!(cache.get(&key("a")).await.is_err());
    }

    #[tokio::test]
    async fn non_recoverable_errors_pass_through_every_behavior() {
        let (backend, _toolkit, cache) = setup(TimeoutBehavior::NoOp);
        backend.fail_when(|op| matches!(op, BackendOp::Put { .. }));

        let err = cache.put(key("a"), "1".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[tokio::test]
    async fn disposal_cancels_calls_and_local_access() {
        let (_backend, _toolkit, cache) = setup(TimeoutBehavior::NoOp);
        cache.dispose_locally().unwrap();

        assert!(cache.is_disposed());
        assert_eq!(cache.get(&key("a")).await.unwrap_err().kind(), ErrorKind::IllegalState);
        assert_eq!(cache.local_size().unwrap_err().kind(), ErrorKind::IllegalState);
        assert_eq!(cache.dispose_locally().unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[tokio::test]
    async fn shutdown_disposes_every_cache() {
        let (_backend, toolkit, cache) = setup(TimeoutBehavior::Exception);
        let other: Cache = toolkit.cache("invoices").build().unwrap();

        toolkit.shutdown();

        assert!(cache.is_disposed());
        assert!(other.is_disposed());
        assert_eq!(other.put(key("a"), "1".into()).await.unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn cache_is_shareable_across_threads() {
        static_assertions::assert_impl_all!(Cache: Send, Sync);
    }
}
