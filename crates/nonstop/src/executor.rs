// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs operations under the deadline and fallback of their resolved policy.

use std::sync::Arc;
use std::time::Duration;

use recoverable::{Recovery, RecoveryKind};
use tick::Clock;
use tokio_util::sync::CancellationToken;

use crate::{Error, ExecutionPath, NonStopPolicy, ObjectKind, OperationClass, PolicyRegistry};

/// Identifies a single call for policy resolution.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    kind: ObjectKind,
    instance: &'a str,
    method: &'a str,
    class: OperationClass,
    policy_override: Option<Arc<NonStopPolicy>>,
}

impl<'a> Invocation<'a> {
    /// Describes a call to `method` on the named instance.
    #[must_use]
    pub fn new(kind: ObjectKind, instance: &'a str, method: &'a str, class: OperationClass) -> Self {
        Self {
            kind,
            instance,
            method,
            class,
            policy_override: None,
        }
    }

    /// Attaches a per-call policy that takes precedence over every registered scope.
    #[must_use]
    pub fn with_override(mut self, policy: Option<Arc<NonStopPolicy>>) -> Self {
        self.policy_override = policy;
        self
    }

    /// Returns the object kind.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Returns the instance name.
    #[must_use]
    pub fn instance(&self) -> &'a str {
        self.instance
    }

    /// Returns the method name.
    #[must_use]
    pub fn method(&self) -> &'a str {
        self.method
    }

    /// Returns the operation class.
    #[must_use]
    pub fn class(&self) -> OperationClass {
        self.class
    }
}

/// How an invocation ended.
///
/// A call is pending until its policy is resolved and running while it
/// waits on the operation or the deadline; a [`Completion`] only ever
/// reports the terminal state it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// The operation finished before the deadline.
    Completed,
    /// The deadline elapsed first.
    TimedOut,
    /// The operation reported that the cluster is unreachable.
    BackendUnavailable,
}

impl InvocationState {
    /// Returns a stable, lowercase name for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }
}

/// The successful result of an invocation, with how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion<T> {
    value: T,
    path: ExecutionPath,
    state: InvocationState,
}

impl<T> Completion<T> {
    /// Returns a reference to the value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the completion and returns the value.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Returns the path that produced the value.
    #[must_use]
    pub fn path(&self) -> ExecutionPath {
        self.path
    }

    /// Returns the terminal state of the invocation.
    #[must_use]
    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// Returns `true` if the value did not come from the cluster.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.path.is_degraded()
    }

    /// Maps the value while keeping the path and state.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completion<U> {
        Completion {
            value: f(self.value),
            path: self.path,
            state: self.state,
        }
    }
}

/// Executes operations under NonStop policies.
///
/// Each call resolves its policy, races the operation against the policy's
/// deadline, and on expiry or cluster unavailability applies the policy's
/// [`TimeoutBehavior`](crate::TimeoutBehavior). Cancelling the executor's
/// token aborts every in-flight call with an illegal-state error and drops
/// the operation future.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use nonstop::{ExecutionPath, Invocation, NonStopExecutor, ObjectKind, OperationClass, PolicyRegistry};
/// use tick::Clock;
///
/// # futures::executor::block_on(async {
/// let executor = NonStopExecutor::new(Arc::new(PolicyRegistry::new()), Clock::new_frozen());
/// let invocation = Invocation::new(ObjectKind::Cache, "orders", "get", OperationClass::Read);
///
/// let completion = executor
///     .execute(&invocation, async { Ok::<_, nonstop::Error>(Some(7)) }, || Ok(None))
///     .await?;
///
/// assert_eq!(completion.into_value(), Some(7));
/// # Ok::<(), nonstop::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct NonStopExecutor {
    registry: Arc<PolicyRegistry>,
    clock: Clock,
    cancellation: CancellationToken,
}

impl NonStopExecutor {
    /// Creates an executor with its own cancellation token.
    #[must_use]
    pub fn new(registry: Arc<PolicyRegistry>, clock: Clock) -> Self {
        Self::with_cancellation(registry, clock, CancellationToken::new())
    }

    /// Creates an executor that stops when `cancellation` is cancelled.
    #[must_use]
    pub fn with_cancellation(registry: Arc<PolicyRegistry>, clock: Clock, cancellation: CancellationToken) -> Self {
        Self {
            registry,
            clock,
            cancellation,
        }
    }

    /// Returns the registry policies are resolved from.
    #[must_use]
    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// Returns the clock deadlines are measured on.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the token that cancels in-flight calls.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns `true` once the cancellation token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns the policy and deadline that apply to `invocation`.
    #[must_use]
    pub fn policy_for(&self, invocation: &Invocation<'_>) -> (Arc<NonStopPolicy>, Duration) {
        let policy = self.registry.resolve_with(
            invocation.policy_override.as_ref(),
            invocation.method,
            invocation.instance,
            invocation.kind,
        );

        let timeout = match (invocation.class, &invocation.policy_override) {
            (OperationClass::Search, Some(policy)) => policy.search_timeout().unwrap_or(policy.timeout()),
            (OperationClass::Search, None) => self
                .registry
                .resolve_search_timeout(invocation.method, invocation.instance, invocation.kind),
            _ => policy.timeout(),
        };

        (policy, timeout)
    }

    /// Runs `operation` under the policy resolved for `invocation`.
    ///
    /// `local` produces the local-tier answer and only runs when the policy
    /// allows a local fallback. Errors from `operation` are returned unchanged
    /// unless their recovery kind is [`RecoveryKind::Unavailable`], which is
    /// handled like a timeout.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error after cancellation, a cluster-unavailable
    /// error when the policy does not allow a fallback, the operation's own
    /// error, or the error returned by `local`.
    pub async fn execute<T, E, F, L>(&self, invocation: &Invocation<'_>, operation: F, local: L) -> Result<Completion<T>, E>
    where
        T: Default,
        E: Recovery + From<Error>,
        F: Future<Output = Result<T, E>>,
        L: FnOnce() -> Result<T, E>,
    {
        if self.cancellation.is_cancelled() {
            return Err(Error::illegal_state(format!("{} '{}' has been shut down", invocation.kind, invocation.instance)).into());
        }

        let (policy, timeout) = self.policy_for(invocation);

        tokio::select! {
            biased;

            () = self.cancellation.cancelled() => {
                Err(Error::illegal_state(format!("{} '{}' was shut down during {}", invocation.kind, invocation.instance, invocation.method)).into())
            }
            result = operation => match result {
                Ok(value) => Ok(Completion {
                    value,
                    path: ExecutionPath::Backend,
                    state: InvocationState::Completed,
                }),
                Err(error) if error.recovery().kind() == RecoveryKind::Unavailable => {
                    Self::degrade(invocation, &policy, timeout, InvocationState::BackendUnavailable, local)
                }
                Err(error) => Err(error),
            },
            () = self.clock.delay(timeout) => {
                tracing::event!(
                    name: "nonstop.timeout",
                    tracing::Level::WARN,
                    nonstop.method = invocation.method,
                    nonstop.instance = invocation.instance,
                    nonstop.kind = invocation.kind.as_str(),
                    nonstop.behavior = policy.behavior().as_str(),
                    timeout.ms = timeout.as_millis(),
                );
                Self::degrade(invocation, &policy, timeout, InvocationState::TimedOut, local)
            }
        }
    }

    fn degrade<T, E, L>(invocation: &Invocation<'_>, policy: &NonStopPolicy, timeout: Duration, state: InvocationState, local: L) -> Result<Completion<T>, E>
    where
        T: Default,
        E: From<Error>,
        L: FnOnce() -> Result<T, E>,
    {
        let Some(path) = policy.behavior().degraded_path(invocation.class) else {
            return Err(Error::cluster_unavailable(format!(
                "{} on {} '{}' did not complete: {} after {}ms",
                invocation.method,
                invocation.kind,
                invocation.instance,
                state.as_str(),
                timeout.as_millis(),
            ))
            .into());
        };

        tracing::event!(
            name: "nonstop.degraded",
            tracing::Level::WARN,
            nonstop.method = invocation.method,
            nonstop.instance = invocation.instance,
            nonstop.kind = invocation.kind.as_str(),
            nonstop.behavior = policy.behavior().as_str(),
            nonstop.path = path.as_str(),
            nonstop.state = state.as_str(),
        );

        let value = match path {
            ExecutionPath::NoOp => T::default(),
            ExecutionPath::Backend | ExecutionPath::LocalReads | ExecutionPath::LocalNonDurable => local()?,
        };

        Ok(Completion { value, path, state })
    }
}
