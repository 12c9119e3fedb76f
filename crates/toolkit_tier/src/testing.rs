// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory cluster backend for testing.
//!
//! [`MockBackend`] stores entries in a map, records every operation, and can
//! be made slow, unreachable, or failing on demand to exercise timeout and
//! degradation paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tick::Clock;
use tokio::sync::OwnedMutexGuard;

use crate::{BackendEntry, ClusterBackend, ClusterNode, Error, LockScope};

/// Recorded backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendOp {
    /// A put against the named store.
    Put {
        /// Store name.
        cache: String,
        /// Serialized key.
        key: Bytes,
        /// Whether the caller held a lock.
        locked: bool,
    },
    /// A get against the named store.
    Get {
        /// Store name.
        cache: String,
        /// Serialized key.
        key: Bytes,
        /// Whether the caller held a lock.
        locked: bool,
    },
    /// A remove against the named store.
    Remove {
        /// Store name.
        cache: String,
        /// Serialized key.
        key: Bytes,
        /// Whether the caller held a lock.
        locked: bool,
    },
    /// A lock acquisition.
    AcquireLock(LockScope),
    /// A lock release.
    ReleaseLock(LockScope),
    /// A listener subscription for the named store.
    Subscribe(String),
    /// A full scan of the named store.
    Scan(String),
    /// A residency query against the named store.
    NodesWithKeys(String),
}

impl BackendOp {
    /// Returns `true` for operations that read or write entry data.
    #[must_use]
    pub fn is_data_access(&self) -> bool {
        matches!(self, Self::Put { .. } | Self::Get { .. } | Self::Remove { .. } | Self::Scan(_))
    }
}

type FailPredicate = Box<dyn Fn(&BackendOp) -> bool + Send + Sync>;

#[derive(Default)]
struct LockTable {
    mutexes: HashMap<LockScope, Arc<tokio::sync::Mutex<()>>>,
    held: HashMap<LockScope, OwnedMutexGuard<()>>,
}

/// A configurable in-memory backend for testing.
///
/// Clones share state, so a test can keep a handle while a store owns another.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use toolkit_tier::testing::{BackendOp, MockBackend};
/// use toolkit_tier::{BackendEntry, ClusterBackend, EntryMetadata};
///
/// # futures::executor::block_on(async {
/// let backend = MockBackend::new();
/// let key = Bytes::from_static(b"k");
/// let entry = BackendEntry::new(Bytes::from_static(b"v"), EntryMetadata::new(0));
///
/// backend.put("orders", key.clone(), entry.clone(), None).await.unwrap();
/// assert_eq!(backend.get("orders", &key, None).await.unwrap(), Some(entry));
///
/// backend.set_reachable(false);
/// assert!(backend.get("orders", &key, None).await.is_err());
/// # });
/// ```
#[derive(Clone)]
pub struct MockBackend {
    data: Arc<Mutex<HashMap<(String, Bytes), BackendEntry>>>,
    operations: Arc<Mutex<Vec<BackendOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
    reachable: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<(Clock, Duration)>>>,
    locks: Arc<Mutex<LockTable>>,
    residency: Arc<Mutex<HashMap<(String, Bytes), HashSet<ClusterNode>>>>,
    members: Arc<Mutex<Vec<ClusterNode>>>,
    local: ClusterNode,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("entries", &self.data.lock().len())
            .field("operations", &self.operations.lock().len())
            .field("fail_when", &self.fail_when.lock().is_some())
            .field("reachable", &self.reachable.load(Ordering::Relaxed))
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates an empty, reachable backend whose local node is `local`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_local_node(ClusterNode::new("local"))
    }

    /// Creates an empty backend running on the given node.
    #[must_use]
    pub fn with_local_node(local: ClusterNode) -> Self {
        Self {
            data: Arc::default(),
            operations: Arc::default(),
            fail_when: Arc::default(),
            reachable: Arc::new(AtomicBool::new(true)),
            latency: Arc::default(),
            locks: Arc::default(),
            residency: Arc::default(),
            members: Arc::new(Mutex::new(vec![local.clone()])),
            local,
        }
    }

    /// Makes every subsequent operation fail with a cluster-unavailable error, or recover.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Delays every subsequent operation by `latency`, measured on `clock`.
    pub fn set_latency(&self, clock: &Clock, latency: Duration) {
        *self.latency.lock() = Some((clock.clone(), latency));
    }

    /// Removes any configured latency.
    pub fn clear_latency(&self) {
        *self.latency.lock() = None;
    }

    /// Sets a predicate deciding which operations fail with a backend error.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&BackendOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<BackendOp> {
        self.operations.lock().clone()
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Writes an entry directly, without recording an operation.
    pub fn seed(&self, cache: &str, key: Bytes, entry: BackendEntry) {
        self.data.lock().insert((cache.to_owned(), key), entry);
    }

    /// Reads an entry directly, without recording an operation.
    #[must_use]
    pub fn entry(&self, cache: &str, key: &Bytes) -> Option<BackendEntry> {
        self.data.lock().get(&(cache.to_owned(), key.clone())).cloned()
    }

    /// Returns the number of entries held for the named store.
    #[must_use]
    pub fn entry_count(&self, cache: &str) -> usize {
        self.data.lock().keys().filter(|(c, _)| c == cache).count()
    }

    /// Adds a cluster member.
    pub fn add_member(&self, node: ClusterNode) {
        let mut members = self.members.lock();
        if !members.contains(&node) {
            members.push(node);
        }
    }

    /// Records that `node` holds `key` of the named store locally.
    pub fn mark_resident(&self, cache: &str, key: Bytes, node: ClusterNode) {
        self.residency.lock().entry((cache.to_owned(), key)).or_default().insert(node);
    }

    /// Returns `true` if the lock is currently held.
    #[must_use]
    pub fn is_locked(&self, scope: &LockScope) -> bool {
        self.locks.lock().held.contains_key(scope)
    }

    async fn enter(&self, op: BackendOp) -> Result<(), Error> {
        let message = format!("mock: {op:?} failed");
        let failing = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op);

        let latency = self.latency.lock().clone();
        if let Some((clock, latency)) = latency {
            clock.delay(latency).await;
        }

        if !self.reachable.load(Ordering::Acquire) {
            return Err(Error::cluster_unavailable("mock: cluster is unreachable"));
        }
        if failing {
            return Err(Error::backend(message));
        }
        Ok(())
    }
}

impl ClusterBackend for MockBackend {
    async fn put(&self, cache: &str, key: Bytes, entry: BackendEntry, lock: Option<&LockScope>) -> Result<Option<BackendEntry>, Error> {
        self.enter(BackendOp::Put {
            cache: cache.to_owned(),
            key: key.clone(),
            locked: lock.is_some(),
        })
        .await?;
        Ok(self.data.lock().insert((cache.to_owned(), key), entry))
    }

    async fn get(&self, cache: &str, key: &Bytes, lock: Option<&LockScope>) -> Result<Option<BackendEntry>, Error> {
        self.enter(BackendOp::Get {
            cache: cache.to_owned(),
            key: key.clone(),
            locked: lock.is_some(),
        })
        .await?;
        Ok(self.entry(cache, key))
    }

    async fn remove(&self, cache: &str, key: &Bytes, lock: Option<&LockScope>) -> Result<Option<BackendEntry>, Error> {
        self.enter(BackendOp::Remove {
            cache: cache.to_owned(),
            key: key.clone(),
            locked: lock.is_some(),
        })
        .await?;
        Ok(self.data.lock().remove(&(cache.to_owned(), key.clone())))
    }

    async fn acquire_lock(&self, scope: &LockScope) -> Result<(), Error> {
        self.enter(BackendOp::AcquireLock(scope.clone())).await?;
        let mutex = Arc::clone(self.locks.lock().mutexes.entry(scope.clone()).or_default());
        let guard = mutex.lock_owned().await;
        self.locks.lock().held.insert(scope.clone(), guard);
        Ok(())
    }

    async fn release_lock(&self, scope: &LockScope) -> Result<(), Error> {
        self.enter(BackendOp::ReleaseLock(scope.clone())).await?;
        match self.locks.lock().held.remove(scope) {
            Some(_guard) => Ok(()),
            None => Err(Error::illegal_state(format!("mock: lock {scope:?} is not held"))),
        }
    }

    async fn subscribe(&self, cache: &str) -> Result<(), Error> {
        self.enter(BackendOp::Subscribe(cache.to_owned())).await
    }

    async fn scan(&self, cache: &str) -> Result<Vec<(Bytes, BackendEntry)>, Error> {
        self.enter(BackendOp::Scan(cache.to_owned())).await?;
        Ok(self
            .data
            .lock()
            .iter()
            .filter(|((c, _), _)| c == cache)
            .map(|((_, key), entry)| (key.clone(), entry.clone()))
            .collect())
    }

    async fn nodes_with_keys(&self, cache: &str, keys: &[Bytes]) -> Result<HashMap<Bytes, HashSet<ClusterNode>>, Error> {
        self.enter(BackendOp::NodesWithKeys(cache.to_owned())).await?;
        let residency = self.residency.lock();
        Ok(keys
            .iter()
            .map(|key| {
                let nodes = residency.get(&(cache.to_owned(), key.clone())).cloned().unwrap_or_default();
                (key.clone(), nodes)
            })
            .collect())
    }

    fn membership_snapshot(&self) -> Vec<ClusterNode> {
        self.members.lock().clone()
    }

    fn local_node(&self) -> ClusterNode {
        self.local.clone()
    }
}
