// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The policy store consulted on every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::{Error, NonStopPolicy, ObjectKind, ScopeKey};

/// Holds registered policies and search timeout overrides.
///
/// Lookups take a shared lock and registration takes an exclusive one, so
/// resolution on the hot path never waits on other readers. One registry is
/// owned per client and shared with every cache it creates.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use nonstop::{NonStopPolicy, ObjectKind, PolicyRegistry, TimeoutBehavior};
///
/// let registry = PolicyRegistry::new();
/// let policy = NonStopPolicy::new(Duration::from_millis(500), TimeoutBehavior::LocalReads)?;
/// registry.register_for_instance(policy, "orders", ObjectKind::Cache)?;
///
/// let resolved = registry.resolve("get", "orders", ObjectKind::Cache);
/// assert_eq!(resolved.behavior(), TimeoutBehavior::LocalReads);
///
/// let fallback = registry.resolve("get", "users", ObjectKind::Cache);
/// assert_eq!(fallback.behavior(), TimeoutBehavior::Exception);
/// # Ok::<(), nonstop::Error>(())
/// ```
#[derive(Debug)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<ScopeKey, Arc<NonStopPolicy>>>,
    search_timeouts: RwLock<HashMap<(String, ObjectKind), Duration>>,
    default_policy: Arc<NonStopPolicy>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyRegistry {
    /// Creates an empty registry whose default policy is [`NonStopPolicy::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_policy(NonStopPolicy::default())
    }

    /// Creates an empty registry with a custom process default.
    #[must_use]
    pub fn with_default_policy(policy: NonStopPolicy) -> Self {
        Self {
            policies: RwLock::default(),
            search_timeouts: RwLock::default(),
            default_policy: Arc::new(policy),
        }
    }

    /// Returns the policy applied when nothing else matches.
    #[must_use]
    pub fn default_policy(&self) -> Arc<NonStopPolicy> {
        Arc::clone(&self.default_policy)
    }

    /// Installs `policy` at every key in `keys`, returning what each key held before.
    ///
    /// Either every key is registered or none is.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-kind error if any key targets a kind without
    /// NonStop support. Nothing is registered in that case.
    pub fn register(&self, policy: NonStopPolicy, keys: &[ScopeKey]) -> Result<Vec<Option<Arc<NonStopPolicy>>>, Error> {
        for key in keys {
            key.kind().ensure_supported()?;
        }

        let policy = Arc::new(policy);
        let mut policies = self.policies.write();
        let previous = keys
            .iter()
            .map(|key| {
                tracing::event!(
                    name: "nonstop.register",
                    tracing::Level::DEBUG,
                    nonstop.scope = %key,
                    nonstop.behavior = policy.behavior().as_str(),
                    timeout.ms = policy.timeout().as_millis(),
                );
                policies.insert(key.clone(), Arc::clone(&policy))
            })
            .collect();

        Ok(previous)
    }

    /// Registers `policy` for every instance of each kind.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-kind error if any kind lacks NonStop support.
    pub fn register_for_type(&self, policy: NonStopPolicy, kinds: &[ObjectKind]) -> Result<Vec<Option<Arc<NonStopPolicy>>>, Error> {
        let keys: Vec<_> = kinds.iter().copied().map(ScopeKey::of_type).collect();
        self.register(policy, &keys)
    }

    /// Registers `policy` for every method of one instance.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-kind error if `kind` lacks NonStop support.
    pub fn register_for_instance(
        &self,
        policy: NonStopPolicy,
        instance: impl Into<String>,
        kind: ObjectKind,
    ) -> Result<Option<Arc<NonStopPolicy>>, Error> {
        self.register_one(policy, ScopeKey::instance(instance, kind))
    }

    /// Registers `policy` for one method of every instance of a kind.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-kind error if `kind` lacks NonStop support.
    pub fn register_for_type_method(
        &self,
        policy: NonStopPolicy,
        method: impl Into<String>,
        kind: ObjectKind,
    ) -> Result<Option<Arc<NonStopPolicy>>, Error> {
        self.register_one(policy, ScopeKey::type_method(method, kind))
    }

    /// Registers `policy` for one method of one instance.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-kind error if `kind` lacks NonStop support.
    pub fn register_for_instance_method(
        &self,
        policy: NonStopPolicy,
        method: impl Into<String>,
        instance: impl Into<String>,
        kind: ObjectKind,
    ) -> Result<Option<Arc<NonStopPolicy>>, Error> {
        self.register_one(policy, ScopeKey::instance_method(method, instance, kind))
    }

    fn register_one(&self, policy: NonStopPolicy, key: ScopeKey) -> Result<Option<Arc<NonStopPolicy>>, Error> {
        Ok(self.register(policy, &[key])?.pop().flatten())
    }

    /// Returns the policy registered at exactly `key`, without falling back.
    #[must_use]
    pub fn config_for(&self, key: &ScopeKey) -> Option<Arc<NonStopPolicy>> {
        self.policies.read().get(key).cloned()
    }

    /// Returns the policy registered for a whole kind.
    #[must_use]
    pub fn config_for_type(&self, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.config_for(&ScopeKey::of_type(kind))
    }

    /// Returns the policy registered for one instance.
    #[must_use]
    pub fn config_for_instance(&self, instance: &str, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.config_for(&ScopeKey::instance(instance, kind))
    }

    /// Returns the policy registered for one method of a kind.
    #[must_use]
    pub fn config_for_type_method(&self, method: &str, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.config_for(&ScopeKey::type_method(method, kind))
    }

    /// Returns the policy registered for one method of one instance.
    #[must_use]
    pub fn config_for_instance_method(&self, method: &str, instance: &str, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.config_for(&ScopeKey::instance_method(method, instance, kind))
    }

    /// Returns the effective policy for a call.
    ///
    /// Scopes are consulted from most to least specific: method and instance,
    /// instance, method and kind, then kind. The default policy applies when
    /// none match.
    #[must_use]
    pub fn resolve(&self, method: &str, instance: &str, kind: ObjectKind) -> Arc<NonStopPolicy> {
        self.resolve_registered(method, instance, kind)
            .unwrap_or_else(|| Arc::clone(&self.default_policy))
    }

    /// Like [`resolve`](Self::resolve), but a present `call_override` wins over every registered scope.
    #[must_use]
    pub fn resolve_with(
        &self,
        call_override: Option<&Arc<NonStopPolicy>>,
        method: &str,
        instance: &str,
        kind: ObjectKind,
    ) -> Arc<NonStopPolicy> {
        match call_override {
            Some(policy) => Arc::clone(policy),
            None => self.resolve(method, instance, kind),
        }
    }

    fn resolve_registered(&self, method: &str, instance: &str, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        let policies = self.policies.read();
        if policies.is_empty() {
            return None;
        }
        ScopeKey::resolution_chain(method, instance, kind)
            .iter()
            .find_map(|key| policies.get(key).cloned())
    }

    /// Removes the policy at exactly `key`, returning it, or `None` if nothing was registered there.
    pub fn deregister(&self, key: &ScopeKey) -> Option<Arc<NonStopPolicy>> {
        let removed = self.policies.write().remove(key);
        if removed.is_some() {
            tracing::event!(
                name: "nonstop.deregister",
                tracing::Level::DEBUG,
                nonstop.scope = %key,
            );
        }
        removed
    }

    /// Removes the policy registered for a whole kind.
    pub fn deregister_for_type(&self, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.deregister(&ScopeKey::of_type(kind))
    }

    /// Removes the policy registered for one instance.
    pub fn deregister_for_instance(&self, instance: &str, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.deregister(&ScopeKey::instance(instance, kind))
    }

    /// Removes the policy registered for one method of a kind.
    pub fn deregister_for_type_method(&self, method: &str, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.deregister(&ScopeKey::type_method(method, kind))
    }

    /// Removes the policy registered for one method of one instance.
    pub fn deregister_for_instance_method(&self, method: &str, instance: &str, kind: ObjectKind) -> Option<Arc<NonStopPolicy>> {
        self.deregister(&ScopeKey::instance_method(method, instance, kind))
    }

    /// Sets the search timeout for one instance, returning the previous override.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero timeout and an unsupported-kind
    /// error if `kind` lacks NonStop support.
    pub fn register_timeout_for_search(&self, timeout: Duration, instance: impl Into<String>, kind: ObjectKind) -> Result<Option<Duration>, Error> {
        if timeout.is_zero() {
            return Err(Error::configuration("search timeout must be greater than zero"));
        }
        let kind = kind.ensure_supported()?;
        Ok(self.search_timeouts.write().insert((instance.into(), kind), timeout))
    }

    /// Returns the search timeout in effect for an instance.
    ///
    /// See [`resolve_search_timeout`](Self::resolve_search_timeout) for the fallback order.
    #[must_use]
    pub fn timeout_for_search(&self, instance: &str, kind: ObjectKind) -> Duration {
        self.resolve_search_timeout(crate::WILDCARD, instance, kind)
    }

    /// Removes the search timeout override for an instance, returning it.
    pub fn deregister_timeout_for_search(&self, instance: &str, kind: ObjectKind) -> Option<Duration> {
        self.search_timeouts.write().remove(&(instance.to_owned(), kind))
    }

    /// Returns the timeout for a search-class call.
    ///
    /// The instance override wins. Otherwise the policy [`resolve`](Self::resolve)
    /// returns supplies its search timeout, or its general timeout when it has
    /// none. The built-in default policy searches for [`DEFAULT_SEARCH_TIMEOUT`](crate::DEFAULT_SEARCH_TIMEOUT).
    #[must_use]
    pub fn resolve_search_timeout(&self, method: &str, instance: &str, kind: ObjectKind) -> Duration {
        if let Some(timeout) = self.search_timeouts.read().get(&(instance.to_owned(), kind)) {
            return *timeout;
        }
        let policy = self.resolve(method, instance, kind);
        policy.search_timeout().unwrap_or(policy.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_SEARCH_TIMEOUT, ErrorKind, TimeoutBehavior};

    fn policy(millis: u64) -> NonStopPolicy {
        NonStopPolicy::new(Duration::from_millis(millis), TimeoutBehavior::LocalReads).unwrap()
    }

    #[test]
    fn registration_returns_previous_policy() {
        let registry = PolicyRegistry::new();
        assert!(registry.register_for_instance(policy(1), "a", ObjectKind::Cache).unwrap().is_none());

        let previous = registry.register_for_instance(policy(2), "a", ObjectKind::Cache).unwrap();
        assert_eq!(previous.unwrap().timeout(), Duration::from_millis(1));
        assert_eq!(registry.config_for_instance("a", ObjectKind::Cache).unwrap().timeout(), Duration::from_millis(2));
    }

    #[test]
    fn unsupported_kind_registers_nothing() {
        let registry = PolicyRegistry::new();
        let err = registry
            .register(policy(1), &[ScopeKey::of_type(ObjectKind::Cache), ScopeKey::of_type(ObjectKind::Map)])
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedKind);
        assert!(registry.config_for_type(ObjectKind::Cache).is_none());
    }

    #[test]
    fn config_getters_do_not_fall_back() {
        let registry = PolicyRegistry::new();
        registry.register_for_type(policy(1), &[ObjectKind::Store]).unwrap();

        assert!(registry.config_for_type(ObjectKind::Store).is_some());
        assert!(registry.config_for_instance("x", ObjectKind::Store).is_none());
        assert!(registry.config_for_type_method("get", ObjectKind::Store).is_none());
        assert!(registry.config_for_instance_method("get", "x", ObjectKind::Store).is_none());
    }

    #[test]
    fn deregistering_unknown_scope_is_none() {
        let registry = PolicyRegistry::new();
        assert!(registry.deregister_for_instance_method("get", "nowhere", ObjectKind::Cache).is_none());
        assert!(registry.deregister_timeout_for_search("nowhere", ObjectKind::Cache).is_none());
    }

    #[test]
    fn override_beats_every_scope() {
        let registry = PolicyRegistry::new();
        registry.register_for_instance_method(policy(1), "get", "a", ObjectKind::Cache).unwrap();
        let call_override = Arc::new(policy(99));

        let resolved = registry.resolve_with(Some(&call_override), "get", "a", ObjectKind::Cache);
        assert_eq!(resolved.timeout(), Duration::from_millis(99));

        let resolved = registry.resolve_with(None, "get", "a", ObjectKind::Cache);
        assert_eq!(resolved.timeout(), Duration::from_millis(1));
    }

    #[test]
    fn search_timeout_follows_a_custom_default_policy() {
        let registry = PolicyRegistry::with_default_policy(policy(250));
        assert_eq!(registry.timeout_for_search("a", ObjectKind::Cache), Duration::from_millis(250));

        let registry = PolicyRegistry::with_default_policy(policy(250).with_search_timeout(Duration::from_millis(400)).unwrap());
        assert_eq!(registry.timeout_for_search("a", ObjectKind::Cache), Duration::from_millis(400));
    }

    #[test]
    fn search_timeout_fallback_order() {
        let registry = PolicyRegistry::new();
        assert_eq!(registry.timeout_for_search("a", ObjectKind::Cache), DEFAULT_SEARCH_TIMEOUT);

        registry.register_for_type(policy(700), &[ObjectKind::Cache]).unwrap();
        assert_eq!(registry.timeout_for_search("a", ObjectKind::Cache), Duration::from_millis(700));

        let with_search = policy(700).with_search_timeout(Duration::from_millis(900)).unwrap();
        registry.register_for_instance(with_search, "a", ObjectKind::Cache).unwrap();
        assert_eq!(registry.timeout_for_search("a", ObjectKind::Cache), Duration::from_millis(900));

        registry
            .register_timeout_for_search(Duration::from_millis(1_200), "a", ObjectKind::Cache)
            .unwrap();
        assert_eq!(registry.timeout_for_search("a", ObjectKind::Cache), Duration::from_millis(1_200));

        assert_eq!(
            registry.deregister_timeout_for_search("a", ObjectKind::Cache),
            Some(Duration::from_millis(1_200))
        );
        assert_eq!(registry.timeout_for_search("a", ObjectKind::Cache), Duration::from_millis(900));
    }

    #[test]
    fn search_timeout_rejects_zero_and_unsupported_kinds() {
        let registry = PolicyRegistry::new();
        let err = registry
            .register_timeout_for_search(Duration::ZERO, "a", ObjectKind::Cache)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = registry
            .register_timeout_for_search(Duration::from_secs(1), "a", ObjectKind::Lock)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedKind);
    }
}
