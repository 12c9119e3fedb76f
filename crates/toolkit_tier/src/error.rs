// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for tiered cache operations.

use std::fmt;

use recoverable::{Recovery, RecoveryInfo};

/// The category of a failed cache operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A policy or cache setting was rejected.
    Configuration,
    /// The cluster could not be reached, or the operation timed out while waiting for it.
    ClusterUnavailable,
    /// The store was used after local disposal or toolkit shutdown.
    IllegalState,
    /// A key or value could not be encoded for the cluster.
    NotSerializable,
    /// The backend reported a failure of its own.
    Backend,
}

impl ErrorKind {
    /// Returns a stable, lowercase name for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ClusterUnavailable => "cluster_unavailable",
            Self::IllegalState => "illegal_state",
            Self::NotSerializable => "not_serializable",
            Self::Backend => "backend",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a tiered cache operation.
///
/// Every error carries an [`ErrorKind`]; the underlying cause, if any, is
/// reachable through [`std::error::Error::source()`].
///
/// # Example
///
/// ```
/// use toolkit_tier::{Error, ErrorKind};
///
/// let error = Error::illegal_state("store has been disposed");
/// assert_eq!(error.kind(), ErrorKind::IllegalState);
/// ```
#[ohno::error]
#[display("tiered cache operation failed: {kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Creates a configuration error.
    pub fn configuration(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Configuration, cause)
    }

    /// Creates an error signalling that the cluster is unreachable.
    pub fn cluster_unavailable(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::ClusterUnavailable, cause)
    }

    /// Creates an error for use after disposal or shutdown.
    pub fn illegal_state(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::IllegalState, cause)
    }

    /// Creates an error for a key or value that failed to encode or decode.
    pub fn not_serializable(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::NotSerializable, cause)
    }

    /// Creates an error reported by a backend implementation.
    pub fn backend(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Backend, cause)
    }
}

impl Recovery for Error {
    fn recovery(&self) -> RecoveryInfo {
        match self.kind {
            ErrorKind::ClusterUnavailable => RecoveryInfo::unavailable(),
            ErrorKind::Backend => RecoveryInfo::retry(),
            ErrorKind::Configuration | ErrorKind::IllegalState | ErrorKind::NotSerializable => RecoveryInfo::never(),
        }
    }
}

/// A specialized [`Result`] type for tiered cache operations.
pub type Result<T> = std::result::Result<T, Error>;
