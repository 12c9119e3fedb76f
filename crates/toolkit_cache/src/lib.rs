// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A cluster-coherent cache client that keeps working when the cluster does not.
//!
//! A [`Toolkit`] is one client of the cluster. It owns the backend handle,
//! the clock, and the [`PolicyRegistry`](nonstop::PolicyRegistry) of NonStop
//! policies, and creates [`ToolkitCache`]s through [`CacheBuilder`].
//!
//! Each cache keeps the authoritative copy of its entries in the cluster and
//! caches a subset in local tiers. Every call that needs the cluster runs
//! under the policy resolved for it. When the cluster is slow or gone, the
//! policy decides between failing, serving local data, applying changes
//! locally only, or doing nothing. The returned
//! [`Completion`](nonstop::Completion) says which happened.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use nonstop::{ExecutionPath, NonStopPolicyBuilder, ObjectKind, TimeoutBehavior};
//! use tick::Clock;
//! use toolkit_cache::{CacheConfig, Toolkit};
//! use toolkit_tier::testing::MockBackend;
//!
//! # futures::executor::block_on(async {
//! let backend = MockBackend::new();
//! let toolkit = Toolkit::new(backend.clone(), Clock::new_frozen());
//!
//! // Reads of "orders" fall back to local data; everything else fails loudly.
//! NonStopPolicyBuilder::new()
//!     .timeout(Duration::from_millis(500))
//!     .behavior(TimeoutBehavior::LocalReads)
//!     .kinds([ObjectKind::Cache])?
//!     .instance_names(["orders"])?
//!     .apply(toolkit.registry())?;
//!
//! let config = CacheConfig {
//!     on_heap_capacity: 1_000,
//!     default_ttl_secs: 3_600,
//!     ..CacheConfig::default()
//! };
//! let orders = toolkit.cache::<u64, String>("orders").config(config).build()?;
//!
//! orders.put(7, "pending".to_owned()).await?;
//!
//! backend.set_reachable(false);
//! let read = orders.get(&7).await?;
//! assert_eq!(read.path(), ExecutionPath::LocalReads);
//! assert_eq!(read.into_value().as_deref(), Some("pending"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

mod builder;
mod cache;
mod config;
mod toolkit;

#[doc(inline)]
pub use builder::CacheBuilder;
#[doc(inline)]
pub use cache::{ToolkitCache, WithOverride};
#[doc(inline)]
pub use config::CacheConfig;
#[doc(inline)]
pub use toolkit::Toolkit;
