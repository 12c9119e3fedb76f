// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A cluster-coherent store with local on-heap and off-heap tiers.
//!
//! [`TieredStore`] keeps the authoritative copy of every entry in a
//! [`ClusterBackend`](toolkit_tier::ClusterBackend) and caches a subset
//! locally:
//!
//! - the **on-heap** tier holds live values and is bounded by entry count;
//! - the optional **off-heap** tier holds serialized values and is bounded by bytes.
//!
//! The tiers are exclusive and LRU ordered. When the on-heap tier is full its
//! least recently used entry moves off-heap, and an off-heap hit moves the
//! entry back. An entry that falls out of both tiers is *evicted*; one whose
//! TTI or TTL has passed is *expired*. Both are reported to registered
//! [`CacheListener`](toolkit_tier::CacheListener)s from a background task.
//!
//! Backend operations come in locked and unlocked flavors, and a set of
//! local-only operations serves introspection and degraded-mode fallbacks.

mod bulk;
mod notifier;
mod settings;
mod store;
mod tier;
mod tiers;

#[doc(inline)]
pub use bulk::BulkRemoval;
#[doc(inline)]
pub use notifier::CacheEvent;
#[doc(inline)]
pub use settings::{DEFAULT_ON_HEAP_CAPACITY, StoreSettings};
#[doc(inline)]
pub use store::TieredStore;
