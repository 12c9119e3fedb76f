// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::{Error, ObjectKind, TimeoutBehavior};

/// The timeout applied when no policy has been registered for a call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The search timeout of the built-in default policy.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// An immutable timeout and fallback configuration.
///
/// Policies are created through [`NonStopPolicy::new`] or
/// [`NonStopPolicyBuilder`](crate::NonStopPolicyBuilder), which reject a zero
/// timeout, and are shared through the registry as `Arc<NonStopPolicy>`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use nonstop::{NonStopPolicy, TimeoutBehavior};
///
/// let policy = NonStopPolicy::new(Duration::from_millis(50), TimeoutBehavior::LocalReads)?;
/// assert_eq!(policy.timeout(), Duration::from_millis(50));
///
/// assert!(NonStopPolicy::new(Duration::ZERO, TimeoutBehavior::LocalReads).is_err());
/// # Ok::<(), nonstop::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonStopPolicy {
    timeout: Duration,
    behavior: TimeoutBehavior,
    kinds: BTreeSet<ObjectKind>,
    search_timeout: Option<Duration>,
}

impl NonStopPolicy {
    /// Creates a policy applicable to every supported object kind.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `timeout` is zero.
    pub fn new(timeout: Duration, behavior: TimeoutBehavior) -> Result<Self, Error> {
        Self::from_parts(timeout, behavior, ObjectKind::SUPPORTED, None)
    }

    pub(crate) fn from_parts(
        timeout: Duration,
        behavior: TimeoutBehavior,
        kinds: impl IntoIterator<Item = ObjectKind>,
        search_timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        if timeout.is_zero() {
            return Err(Error::configuration("nonstop timeout must be greater than zero"));
        }
        if search_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration("nonstop search timeout must be greater than zero"));
        }
        let kinds: BTreeSet<ObjectKind> = kinds.into_iter().map(ObjectKind::ensure_supported).collect::<Result<_, Error>>()?;

        Ok(Self {
            timeout,
            behavior,
            kinds,
            search_timeout,
        })
    }

    /// Sets a dedicated timeout for search-class operations resolved to this policy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `timeout` is zero.
    pub fn with_search_timeout(self, timeout: Duration) -> Result<Self, Error> {
        Self::from_parts(self.timeout, self.behavior, self.kinds, Some(timeout))
    }

    /// Returns the deadline for a single call.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns what happens when the deadline elapses.
    #[must_use]
    pub fn behavior(&self) -> TimeoutBehavior {
        self.behavior
    }

    /// Returns the object kinds this policy was built for.
    #[must_use]
    pub fn kinds(&self) -> &BTreeSet<ObjectKind> {
        &self.kinds
    }

    /// Returns the dedicated search timeout, if one was set.
    #[must_use]
    pub fn search_timeout(&self) -> Option<Duration> {
        self.search_timeout
    }
}

impl Default for NonStopPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            behavior: TimeoutBehavior::Exception,
            kinds: BTreeSet::from(ObjectKind::SUPPORTED),
            search_timeout: Some(DEFAULT_SEARCH_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn default_policy_fails_loudly_after_thirty_seconds() {
        let policy = NonStopPolicy::default();
        assert_eq!(policy.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(policy.behavior(), TimeoutBehavior::Exception);
        assert_eq!(policy.search_timeout(), Some(DEFAULT_SEARCH_TIMEOUT));
        assert_eq!(policy.kinds().len(), 2);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let err = NonStopPolicy::new(Duration::ZERO, TimeoutBehavior::NoOp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = NonStopPolicy::new(Duration::from_secs(1), TimeoutBehavior::NoOp)
            .unwrap()
            .with_search_timeout(Duration::ZERO)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn unsupported_kinds_are_rejected() {
        let err = NonStopPolicy::from_parts(Duration::from_secs(1), TimeoutBehavior::NoOp, [ObjectKind::Barrier], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedKind);
    }
}
