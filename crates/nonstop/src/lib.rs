// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Timeout policies for clients of a cluster that may be slow or unreachable.
//!
//! A NonStop policy pairs a per-call timeout with a [`TimeoutBehavior`] that
//! says what to do when the cluster does not answer in time: fail, serve
//! local data, apply changes locally only, or do nothing.
//!
//! # Resolution
//!
//! Policies are registered in a [`PolicyRegistry`] at one of four
//! [`ScopeKey`] shapes. A call is resolved against them from most to least
//! specific, and a per-call override beats all of them:
//!
//! 1. per-call override
//! 2. method of an instance
//! 3. instance
//! 4. method of a kind
//! 5. kind
//!
//! When nothing matches, the registry's default policy applies; out of the
//! box it fails with a cluster-unavailable error after 30 seconds.
//!
//! # Execution
//!
//! [`NonStopExecutor`] runs an operation under its resolved policy and
//! reports how the result was produced through [`Completion`]:
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use nonstop::{
//!     ExecutionPath, Invocation, NonStopExecutor, NonStopPolicyBuilder, ObjectKind, OperationClass, PolicyRegistry,
//!     TimeoutBehavior,
//! };
//! use tick::Clock;
//!
//! # futures::executor::block_on(async {
//! let registry = Arc::new(PolicyRegistry::new());
//! NonStopPolicyBuilder::new()
//!     .timeout(Duration::from_millis(50))
//!     .behavior(TimeoutBehavior::LocalReads)
//!     .apply(&registry)?;
//!
//! let executor = NonStopExecutor::new(registry, Clock::new_frozen());
//! let invocation = Invocation::new(ObjectKind::Cache, "orders", "get", OperationClass::Read);
//!
//! let unreachable = async { Err::<Option<u32>, _>(toolkit_tier::Error::cluster_unavailable("node lost")) };
//! let completion = executor.execute(&invocation, unreachable, || Ok(Some(3))).await?;
//!
//! assert_eq!(completion.path(), ExecutionPath::LocalReads);
//! assert_eq!(completion.into_value(), Some(3));
//! # Ok::<(), toolkit_tier::Error>(())
//! # }).unwrap();
//! ```

mod behavior;
mod builder;
mod config;
mod error;
mod executor;
mod kind;
mod policy;
mod registry;
mod scope;

#[doc(inline)]
pub use behavior::{ExecutionPath, OperationClass, TimeoutBehavior};
#[doc(inline)]
pub use builder::NonStopPolicyBuilder;
#[doc(inline)]
pub use config::NonStopConfig;
#[doc(inline)]
pub use error::{Error, ErrorKind};
#[doc(inline)]
pub use executor::{Completion, Invocation, InvocationState, NonStopExecutor};
#[doc(inline)]
pub use kind::ObjectKind;
#[doc(inline)]
pub use policy::{DEFAULT_SEARCH_TIMEOUT, DEFAULT_TIMEOUT, NonStopPolicy};
#[doc(inline)]
pub use registry::PolicyRegistry;
#[doc(inline)]
pub use scope::{ScopeKey, WILDCARD};
