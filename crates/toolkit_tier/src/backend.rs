// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The contract between tiered stores and the cluster they are coherent with.
//!
//! [`ClusterBackend`] is the authoritative, shared copy of every store. Local
//! tiers only ever hold what the backend has confirmed, except where a
//! non-durable fallback explicitly writes locally while the cluster is away.

use std::collections::{HashMap, HashSet};
use std::fmt;

use bytes::Bytes;

use crate::{EntryMetadata, Error};

/// A serialized value together with its timing metadata, as stored by the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendEntry {
    value: Bytes,
    metadata: EntryMetadata,
}

impl BackendEntry {
    /// Creates a new backend entry.
    #[must_use]
    pub fn new(value: Bytes, metadata: EntryMetadata) -> Self {
        Self { value, metadata }
    }

    /// Returns the serialized value.
    #[must_use]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Returns the timing metadata.
    #[must_use]
    pub fn metadata(&self) -> EntryMetadata {
        self.metadata
    }
}

/// A member of the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterNode {
    id: String,
}

impl ClusterNode {
    /// Creates a node handle with the given identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Returns the node identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// The unit a cluster lock is taken on: a single key of a store, or the whole store.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockScope {
    cache: String,
    key: Option<Bytes>,
}

impl LockScope {
    /// A lock guarding one key of the named store.
    #[must_use]
    pub fn key(cache: impl Into<String>, key: Bytes) -> Self {
        Self {
            cache: cache.into(),
            key: Some(key),
        }
    }

    /// A lock guarding the whole named store.
    #[must_use]
    pub fn cache(cache: impl Into<String>) -> Self {
        Self {
            cache: cache.into(),
            key: None,
        }
    }

    /// Returns the store name.
    #[must_use]
    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    /// Returns the guarded key, or `None` for a store-wide lock.
    #[must_use]
    pub fn guarded_key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }
}

/// The cluster-side operations a tiered store relies on.
///
/// Keys and values are already serialized when they reach the backend. A
/// backend that cannot reach its cluster reports [`ErrorKind::ClusterUnavailable`];
/// any other failure should use [`ErrorKind::Backend`].
///
/// The `lock` argument of the data operations names a lock the caller already
/// holds through [`acquire_lock`](Self::acquire_lock). Unlocked operations pass `None`.
///
/// [`ErrorKind::ClusterUnavailable`]: crate::ErrorKind::ClusterUnavailable
/// [`ErrorKind::Backend`]: crate::ErrorKind::Backend
pub trait ClusterBackend: Send + Sync + 'static {
    /// Stores an entry, returning the previous one.
    fn put(
        &self,
        cache: &str,
        key: Bytes,
        entry: BackendEntry,
        lock: Option<&LockScope>,
    ) -> impl Future<Output = Result<Option<BackendEntry>, Error>> + Send;

    /// Reads an entry.
    fn get(&self, cache: &str, key: &Bytes, lock: Option<&LockScope>) -> impl Future<Output = Result<Option<BackendEntry>, Error>> + Send;

    /// Removes an entry, returning the previous one.
    fn remove(&self, cache: &str, key: &Bytes, lock: Option<&LockScope>)
    -> impl Future<Output = Result<Option<BackendEntry>, Error>> + Send;

    /// Waits until the lock is held by this client.
    fn acquire_lock(&self, scope: &LockScope) -> impl Future<Output = Result<(), Error>> + Send;

    /// Releases a lock previously taken with [`acquire_lock`](Self::acquire_lock).
    fn release_lock(&self, scope: &LockScope) -> impl Future<Output = Result<(), Error>> + Send;

    /// Registers this client for eviction and expiration events of the named store.
    fn subscribe(&self, cache: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Returns every entry of the named store.
    fn scan(&self, cache: &str) -> impl Future<Output = Result<Vec<(Bytes, BackendEntry)>, Error>> + Send;

    /// Reports, for each key, the nodes that hold it locally.
    fn nodes_with_keys(
        &self,
        cache: &str,
        keys: &[Bytes],
    ) -> impl Future<Output = Result<HashMap<Bytes, HashSet<ClusterNode>>, Error>> + Send;

    /// Returns the current cluster membership.
    fn membership_snapshot(&self) -> Vec<ClusterNode>;

    /// Returns the node this client runs on.
    fn local_node(&self) -> ClusterNode;
}
