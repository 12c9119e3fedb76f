// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use nonstop::NonStopExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use toolkit_store::TieredStore;
use toolkit_tier::{ClusterBackend, Error};

use crate::toolkit::LocalResources;
use crate::{CacheConfig, Toolkit, ToolkitCache};

/// Builder for a [`ToolkitCache`], created by [`Toolkit::cache`].
#[derive(Debug)]
pub struct CacheBuilder<'a, K, V, B> {
    toolkit: &'a Toolkit<B>,
    name: String,
    config: CacheConfig,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<'a, K, V, B> CacheBuilder<'a, K, V, B> {
    pub(crate) fn new(toolkit: &'a Toolkit<B>, name: String) -> Self {
        Self {
            toolkit,
            name,
            config: CacheConfig::default(),
            _phantom: PhantomData,
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the maximum number of on-heap entries.
    #[must_use]
    pub fn on_heap_capacity(mut self, entries: usize) -> Self {
        self.config.on_heap_capacity = entries;
        self
    }

    /// Sets the byte budget of the off-heap tier; zero disables it.
    #[must_use]
    pub fn off_heap_capacity_bytes(mut self, bytes: usize) -> Self {
        self.config.off_heap_capacity_bytes = bytes;
        self
    }

    /// Sets the default time to idle, truncated to whole seconds.
    #[must_use]
    pub fn default_tti(mut self, tti: Duration) -> Self {
        self.config.default_tti_secs = whole_secs(tti);
        self
    }

    /// Sets the default time to live, truncated to whole seconds.
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl_secs = whole_secs(ttl);
        self
    }
}

impl<K, V, B> CacheBuilder<'_, K, V, B>
where
    K: Clone + Hash + Eq + Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    B: ClusterBackend,
{
    /// Creates the cache.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero on-heap capacity, or an
    /// illegal-state error if the toolkit is shut down.
    pub fn build(self) -> Result<ToolkitCache<K, V, B>, Error> {
        let store = Arc::new(TieredStore::new(
            self.name,
            Arc::clone(self.toolkit.backend()),
            self.toolkit.clock().clone(),
            self.config.into(),
        )?);

        let weak = Arc::downgrade(&store);
        let tracked: Weak<dyn LocalResources> = weak;
        let token = self.toolkit.attach(tracked)?;
        let executor = NonStopExecutor::with_cancellation(Arc::clone(self.toolkit.registry()), self.toolkit.clock().clone(), token);

        tracing::event!(
            name: "toolkit.cache.created",
            tracing::Level::DEBUG,
            cache.name = store.name(),
            cache.on_heap_capacity = self.config.on_heap_capacity,
            cache.off_heap_capacity_bytes = self.config.off_heap_capacity_bytes,
        );
        Ok(ToolkitCache::new(store, executor))
    }
}

fn whole_secs(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use tick::Clock;
    use toolkit_tier::ErrorKind;
    use toolkit_tier::testing::MockBackend;

    use super::*;

    fn toolkit() -> Toolkit<MockBackend> {
        Toolkit::new(MockBackend::new(), Clock::new_frozen())
    }

    #[test]
    fn setters_fill_the_config() {
        let toolkit = toolkit();
        let cache = toolkit
            .cache::<String, u32>("orders")
            .on_heap_capacity(5)
            .off_heap_capacity_bytes(1024)
            .default_tti(Duration::from_millis(90_500))
            .default_ttl(Duration::from_secs(600))
            .build()
            .unwrap();

        let settings = cache.settings();
        assert_eq!(settings.on_heap_capacity, 5);
        assert_eq!(settings.off_heap_capacity_bytes, 1024);
        assert_eq!(settings.expiry.tti, 90);
        assert_eq!(settings.expiry.ttl, 600);
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        let err = toolkit().cache::<String, u32>("orders").on_heap_capacity(0).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn building_after_shutdown_fails() {
        let toolkit = toolkit();
        toolkit.shutdown();

        let err = toolkit.cache::<String, u32>("orders").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn huge_durations_saturate() {
        assert_eq!(whole_secs(Duration::from_secs(u64::MAX)), u32::MAX);
    }
}
