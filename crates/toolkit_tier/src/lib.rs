// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Shared building blocks for cluster-coherent tiered caches.
//!
//! This crate defines what a tiered store and its cluster agree on: the
//! [`CacheEntry`] and [`BackendEntry`] representations with their timing
//! metadata, the [`ClusterBackend`] contract, the [`CacheListener`] callback
//! interface, and the [`Error`] type every operation returns.
//!
//! # Implementing a Backend
//!
//! A backend stores serialized entries per named store and provides cluster
//! locks. Reachability problems must surface as
//! [`ErrorKind::ClusterUnavailable`] so that timeout policies can take over.
//!
//! Enable the `test-util` feature for [`testing::MockBackend`], an in-memory
//! backend with latency and failure injection.

mod backend;
pub mod codec;
mod entry;
pub mod error;
mod listener;
mod location;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use backend::{BackendEntry, ClusterBackend, ClusterNode, LockScope};
#[doc(inline)]
pub use entry::{CacheEntry, EntryMetadata, ExpiryDefaults, epoch_secs};
#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use listener::CacheListener;
#[doc(inline)]
pub use location::TierLocation;
