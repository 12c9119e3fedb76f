// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use recoverable::{Recovery, RecoveryInfo};

use crate::ObjectKind;

/// The category of a NonStop failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A policy was constructed or registered with invalid settings.
    Configuration,
    /// A policy targeted an object kind that does not support NonStop.
    UnsupportedKind,
    /// The deadline elapsed, or the cluster was unreachable, and the policy did not allow a fallback.
    ClusterUnavailable,
    /// The executor was used after its owner shut down.
    IllegalState,
}

impl ErrorKind {
    /// Returns a stable, lowercase name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::UnsupportedKind => "unsupported_kind",
            Self::ClusterUnavailable => "cluster_unavailable",
            Self::IllegalState => "illegal_state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised while configuring or applying a NonStop policy.
#[ohno::error]
#[display("nonstop failure: {kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn configuration(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Configuration, cause)
    }

    pub(crate) fn unsupported_kind(kind: ObjectKind) -> Self {
        Self::caused_by(
            ErrorKind::UnsupportedKind,
            format!("{kind} is not yet supported as a non stop data structure"),
        )
    }

    pub(crate) fn cluster_unavailable(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::ClusterUnavailable, cause)
    }

    pub(crate) fn illegal_state(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::IllegalState, cause)
    }
}

impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            ErrorKind::ClusterUnavailable => RecoveryInfo::unavailable(),
            ErrorKind::Configuration | ErrorKind::UnsupportedKind | ErrorKind::IllegalState => RecoveryInfo::never(),
        }
    }
}

impl From<Error> for toolkit_tier::Error {
    fn from(error: Error) -> Self {
        match error.kind {
            ErrorKind::Configuration | ErrorKind::UnsupportedKind => Self::configuration(error),
            ErrorKind::ClusterUnavailable => Self::cluster_unavailable(error),
            ErrorKind::IllegalState => Self::illegal_state(error),
        }
    }
}
