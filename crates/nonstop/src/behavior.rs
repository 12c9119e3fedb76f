// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a call does when its deadline elapses or the cluster is unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBehavior {
    /// Fail with a cluster-unavailable error.
    #[default]
    Exception,
    /// Serve reads from the local tiers; mutations fail.
    LocalReads,
    /// Serve reads from the local tiers and apply mutations locally only.
    ///
    /// Local mutations made this way are not durable: the cluster never sees them.
    LocalMethods,
    /// Return an empty result without error.
    NoOp,
}

impl TimeoutBehavior {
    /// Returns a stable, lowercase name for the behavior.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exception => "exception",
            Self::LocalReads => "local_reads",
            Self::LocalMethods => "local_methods",
            Self::NoOp => "no_op",
        }
    }

    /// Returns the degraded path an operation of `class` takes under this
    /// behavior, or `None` when the call must fail instead.
    #[must_use]
    pub const fn degraded_path(self, class: OperationClass) -> Option<ExecutionPath> {
        match (self, class) {
            (Self::Exception, _) | (Self::LocalReads, OperationClass::Mutation | OperationClass::Registration) => None,
            (Self::LocalReads | Self::LocalMethods, OperationClass::Read | OperationClass::Search) => Some(ExecutionPath::LocalReads),
            (Self::LocalMethods, OperationClass::Mutation | OperationClass::Registration) => Some(ExecutionPath::LocalNonDurable),
            (Self::NoOp, _) => Some(ExecutionPath::NoOp),
        }
    }
}

impl fmt::Display for TimeoutBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an operation interacts with the cluster, which decides its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Reads a value or metadata.
    Read,
    /// Writes or removes data.
    Mutation,
    /// Scans the store; uses the search timeout.
    Search,
    /// Registers or removes a listener.
    Registration,
}

impl OperationClass {
    /// Returns a stable, lowercase name for the class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Mutation => "mutation",
            Self::Search => "search",
            Self::Registration => "registration",
        }
    }
}

/// The path that produced a call's result.
///
/// Anything other than [`Backend`](Self::Backend) is a degraded outcome that
/// the active policy explicitly allowed. Degraded outcomes are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    /// The cluster completed the operation.
    Backend,
    /// The value came from the local tiers and may be stale or missing.
    LocalReads,
    /// The mutation was applied locally only and is not durable.
    LocalNonDurable,
    /// Nothing was done; the value is the type's default.
    NoOp,
}

impl ExecutionPath {
    /// Returns `true` for every path except [`Backend`](Self::Backend).
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        !matches!(self, Self::Backend)
    }

    /// Returns a stable, lowercase name for the path.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::LocalReads => "local_reads",
            Self::LocalNonDurable => "local_non_durable",
            Self::NoOp => "no_op",
        }
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
