// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use nonstop::PolicyRegistry;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tick::Clock;
use tokio_util::sync::CancellationToken;
use toolkit_store::TieredStore;
use toolkit_tier::{ClusterBackend, Error};
use uuid::Uuid;

use crate::CacheBuilder;

type Hook = Box<dyn FnOnce() + Send>;

/// Local resources a toolkit releases when it shuts down.
pub(crate) trait LocalResources: Send + Sync {
    fn release(&self);
}

impl<K, V, B> LocalResources for TieredStore<K, V, B>
where
    K: Clone + Hash + Eq + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    B: ClusterBackend,
{
    fn release(&self) {
        if !self.is_disposed() {
            // Only fails when a concurrent dispose won the race.
            let _ = self.dispose_locally();
        }
    }
}

/// A client of the cluster: the owner of every cache it creates.
///
/// The toolkit holds the backend handle, the clock, and the
/// [`PolicyRegistry`] that every cache created from it resolves NonStop
/// policies against. Shutting it down cancels in-flight calls of all its
/// caches and releases their local tiers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use nonstop::{NonStopPolicyBuilder, TimeoutBehavior};
/// use tick::Clock;
/// use toolkit_cache::Toolkit;
/// use toolkit_tier::testing::MockBackend;
///
/// # futures::executor::block_on(async {
/// let toolkit = Toolkit::new(MockBackend::new(), Clock::new_frozen());
/// NonStopPolicyBuilder::new()
///     .timeout(Duration::from_secs(2))
///     .behavior(TimeoutBehavior::LocalReads)
///     .apply(toolkit.registry())?;
///
/// let orders = toolkit.cache::<String, u32>("orders").on_heap_capacity(1_000).build()?;
/// orders.put("a".to_owned(), 1).await?;
/// assert_eq!(orders.get(&"a".to_owned()).await?.into_value(), Some(1));
///
/// toolkit.shutdown();
/// assert!(orders.get(&"a".to_owned()).await.is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
pub struct Toolkit<B> {
    client_id: Uuid,
    backend: Arc<B>,
    clock: Clock,
    registry: Arc<PolicyRegistry>,
    shutdown: CancellationToken,
    shut_down: AtomicBool,
    hooks: Mutex<Vec<Hook>>,
    caches: Mutex<Vec<Weak<dyn LocalResources>>>,
}

impl<B> std::fmt::Debug for Toolkit<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("client_id", &self.client_id)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .field("hooks", &self.hooks.lock().len())
            .field("caches", &self.caches.lock().len())
            .finish_non_exhaustive()
    }
}

impl<B: ClusterBackend> Toolkit<B> {
    /// Creates a client with an empty policy registry.
    #[must_use]
    pub fn new(backend: B, clock: Clock) -> Self {
        Self::with_registry(backend, clock, Arc::new(PolicyRegistry::new()))
    }

    /// Creates a client that resolves policies against an existing registry.
    #[must_use]
    pub fn with_registry(backend: B, clock: Clock, registry: Arc<PolicyRegistry>) -> Self {
        let client_id = Uuid::new_v4();
        tracing::event!(name: "toolkit.started", tracing::Level::DEBUG, client.id = %client_id);

        Self {
            client_id,
            backend: Arc::new(backend),
            clock,
            registry,
            shutdown: CancellationToken::new(),
            shut_down: AtomicBool::new(false),
            hooks: Mutex::default(),
            caches: Mutex::default(),
        }
    }

    /// Returns the identifier of this client, unique per process run.
    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Returns the registry NonStop policies are resolved from.
    #[must_use]
    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// Returns the cluster backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Returns the clock used for deadlines and expiry.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Starts building a cache named `name`.
    ///
    /// Caches with the same name share their cluster data but not their local tiers.
    #[must_use]
    pub fn cache<K, V>(&self, name: impl Into<String>) -> CacheBuilder<'_, K, V, B> {
        CacheBuilder::new(self, name.into())
    }

    /// Registers `hook` to run when [`shutdown`](Self::shutdown) starts, before any cache stops.
    ///
    /// Hooks run in registration order.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error if the toolkit is already shut down.
    pub fn register_before_shutdown_hook(&self, hook: impl FnOnce() + Send + 'static) -> Result<(), Error> {
        let mut hooks = self.hooks.lock();
        if self.is_shut_down() {
            return Err(self.shut_down_error());
        }
        hooks.push(Box::new(hook));
        Ok(())
    }

    /// Shuts the client down.
    ///
    /// Runs the before-shutdown hooks, cancels every in-flight call, and
    /// releases the local tiers of all caches. Calls made afterwards fail
    /// with an illegal-state error. Shutting down twice does nothing.
    pub fn shutdown(&self) {
        let hooks = {
            let mut hooks = self.hooks.lock();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *hooks)
        };

        let hook_count = hooks.len();
        for hook in hooks {
            if panic::catch_unwind(AssertUnwindSafe(hook)).is_err() {
                tracing::event!(name: "toolkit.hook.panicked", tracing::Level::ERROR, client.id = %self.client_id);
            }
        }

        self.shutdown.cancel();
        let caches = std::mem::take(&mut *self.caches.lock());
        for cache in caches.iter().filter_map(Weak::upgrade) {
            cache.release();
        }

        tracing::event!(
            name: "toolkit.shutdown",
            tracing::Level::INFO,
            client.id = %self.client_id,
            toolkit.hooks = hook_count,
            toolkit.caches = caches.len(),
        );
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Hands out a cancellation token for a new cache and tracks its store for shutdown.
    pub(crate) fn attach(&self, store: Weak<dyn LocalResources>) -> Result<CancellationToken, Error> {
        let mut caches = self.caches.lock();
        if self.shutdown.is_cancelled() {
            return Err(self.shut_down_error());
        }
        caches.retain(|cache| cache.strong_count() > 0);
        caches.push(store);
        Ok(self.shutdown.child_token())
    }

    fn shut_down_error(&self) -> Error {
        Error::illegal_state(format!("toolkit client {} has been shut down", self.client_id))
    }
}
