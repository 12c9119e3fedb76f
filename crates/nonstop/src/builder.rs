// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::{DEFAULT_TIMEOUT, Error, NonStopPolicy, ObjectKind, PolicyRegistry, ScopeKey, TimeoutBehavior, WILDCARD};

/// Assembles a [`NonStopPolicy`] and the scopes it is registered at.
///
/// Targeting an unsupported kind or passing an empty kind or filter list fails at the call
/// that sets it. The timeout is only checked by [`build`](Self::build) and
/// [`apply`](Self::apply), so it may be set in any order.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use nonstop::{NonStopPolicyBuilder, ObjectKind, PolicyRegistry, TimeoutBehavior};
///
/// let registry = PolicyRegistry::new();
///
/// NonStopPolicyBuilder::new()
///     .timeout(Duration::from_millis(250))
///     .behavior(TimeoutBehavior::LocalReads)
///     .kinds([ObjectKind::Cache])?
///     .instance_names(["orders"])?
///     .apply(&registry)?;
///
/// let policy = registry.config_for_instance("orders", ObjectKind::Cache).unwrap();
/// assert_eq!(policy.timeout(), Duration::from_millis(250));
/// # Ok::<(), nonstop::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct NonStopPolicyBuilder {
    timeout: Duration,
    behavior: TimeoutBehavior,
    kinds: Vec<ObjectKind>,
    instance_names: Vec<String>,
    method_names: Vec<String>,
    search_timeout: Option<Duration>,
}

impl Default for NonStopPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NonStopPolicyBuilder {
    /// Creates a builder targeting every method of every supported kind with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            behavior: TimeoutBehavior::default(),
            kinds: ObjectKind::SUPPORTED.to_vec(),
            instance_names: vec![WILDCARD.to_owned()],
            method_names: vec![WILDCARD.to_owned()],
            search_timeout: None,
        }
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the per-call timeout in milliseconds.
    #[must_use]
    pub fn timeout_millis(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    /// Sets the timeout behavior.
    #[must_use]
    pub fn behavior(mut self, behavior: TimeoutBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Sets a dedicated timeout for search-class calls.
    #[must_use]
    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = Some(timeout);
        self
    }

    /// Sets the object kinds to target.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-kind error for the first kind without NonStop
    /// support, or a configuration error if no kind is given.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = ObjectKind>) -> Result<Self, Error> {
        let kinds: Vec<ObjectKind> = kinds.into_iter().map(ObjectKind::ensure_supported).collect::<Result<_, _>>()?;
        if kinds.is_empty() {
            return Err(Error::configuration("at least one object kind is required"));
        }
        self.kinds = kinds;
        Ok(self)
    }

    /// Sets the instance name filters; `"*"` matches every instance.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no filter is given or any filter is empty.
    pub fn instance_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Result<Self, Error> {
        self.instance_names = filters(names, "instance name")?;
        Ok(self)
    }

    /// Sets the method name filters; `"*"` matches every method.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no filter is given or any filter is empty.
    pub fn method_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Result<Self, Error> {
        self.method_names = filters(names, "method name")?;
        Ok(self)
    }

    /// Builds the policy without registering it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero timeout or search timeout.
    pub fn build(&self) -> Result<NonStopPolicy, Error> {
        NonStopPolicy::from_parts(self.timeout, self.behavior, self.kinds.iter().copied(), self.search_timeout)
    }

    /// Returns every scope this builder registers at: kinds × instance filters × method filters.
    #[must_use]
    pub fn scopes(&self) -> Vec<ScopeKey> {
        let mut scopes = Vec::with_capacity(self.kinds.len() * self.instance_names.len() * self.method_names.len());
        for kind in &self.kinds {
            for instance in &self.instance_names {
                for method in &self.method_names {
                    let scope = ScopeKey::from_filters(*kind, instance, method);
                    if !scopes.contains(&scope) {
                        scopes.push(scope);
                    }
                }
            }
        }
        scopes
    }

    /// Builds the policy and registers it at every scope in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid timeout. The registry is
    /// left unchanged on error.
    pub fn apply(&self, registry: &PolicyRegistry) -> Result<(), Error> {
        let policy = self.build()?;
        registry.register(policy, &self.scopes())?;
        Ok(())
    }
}

fn filters<S: Into<String>>(names: impl IntoIterator<Item = S>, what: &str) -> Result<Vec<String>, Error> {
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    if names.is_empty() {
        return Err(Error::configuration(format!("at least one {what} filter is required")));
    }
    if names.iter().any(String::is_empty) {
        return Err(Error::configuration(format!("{what} filter cannot be empty")));
    }
    Ok(names)
}
