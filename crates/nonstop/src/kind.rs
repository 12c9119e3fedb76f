// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// The kinds of clustered object a client can create.
///
/// Only [`Store`](Self::Store) and [`Cache`](Self::Cache) accept NonStop
/// policies; the rest exist so that configuration naming them is rejected
/// explicitly instead of being ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A key/value cache with expiry.
    Cache,
    /// A key/value store without expiry.
    Store,
    /// A clustered map.
    Map,
    /// A clustered sorted map.
    SortedMap,
    /// A clustered list.
    List,
    /// A clustered set.
    Set,
    /// A clustered sorted set.
    SortedSet,
    /// A clustered blocking queue.
    BlockingQueue,
    /// A clustered lock.
    Lock,
    /// A clustered read/write lock.
    ReadWriteLock,
    /// A clustered atomic counter.
    AtomicLong,
    /// A clustered barrier.
    Barrier,
    /// A clustered notifier.
    Notifier,
}

impl ObjectKind {
    /// The kinds that accept NonStop policies.
    pub const SUPPORTED: [Self; 2] = [Self::Store, Self::Cache];

    /// Returns `true` if policies may target this kind.
    #[must_use]
    pub const fn supports_nonstop(self) -> bool {
        match self {
            Self::Store | Self::Cache => true,
            Self::Map
            | Self::SortedMap
            | Self::List
            | Self::Set
            | Self::SortedSet
            | Self::BlockingQueue
            | Self::Lock
            | Self::ReadWriteLock
            | Self::AtomicLong
            | Self::Barrier
            | Self::Notifier => false,
        }
    }

    /// Returns a stable, lowercase name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
            Self::Map => "map",
            Self::SortedMap => "sorted_map",
            Self::List => "list",
            Self::Set => "set",
            Self::SortedSet => "sorted_set",
            Self::BlockingQueue => "blocking_queue",
            Self::Lock => "lock",
            Self::ReadWriteLock => "read_write_lock",
            Self::AtomicLong => "atomic_long",
            Self::Barrier => "barrier",
            Self::Notifier => "notifier",
        }
    }

    pub(crate) fn ensure_supported(self) -> Result<Self, Error> {
        if self.supports_nonstop() {
            Ok(self)
        } else {
            Err(Error::unsupported_kind(self))
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
