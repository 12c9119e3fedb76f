// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use crate::ObjectKind;

/// Filter value that matches every instance or method.
pub const WILDCARD: &str = "*";

/// A coordinate at which a policy can be registered.
///
/// Variants are listed from most to least specific. A per-call override sits
/// above all of them but is never stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// A single method of a single named instance.
    InstanceMethod {
        /// Method name.
        method: String,
        /// Instance name.
        instance: String,
        /// Object kind.
        kind: ObjectKind,
    },
    /// Every method of a single named instance.
    Instance {
        /// Instance name.
        instance: String,
        /// Object kind.
        kind: ObjectKind,
    },
    /// A single method of every instance of a kind.
    TypeMethod {
        /// Method name.
        method: String,
        /// Object kind.
        kind: ObjectKind,
    },
    /// Every method of every instance of a kind.
    Type {
        /// Object kind.
        kind: ObjectKind,
    },
}

impl ScopeKey {
    /// Scope for one method of one instance.
    #[must_use]
    pub fn instance_method(method: impl Into<String>, instance: impl Into<String>, kind: ObjectKind) -> Self {
        Self::InstanceMethod {
            method: method.into(),
            instance: instance.into(),
            kind,
        }
    }

    /// Scope for every method of one instance.
    #[must_use]
    pub fn instance(instance: impl Into<String>, kind: ObjectKind) -> Self {
        Self::Instance {
            instance: instance.into(),
            kind,
        }
    }

    /// Scope for one method of every instance of a kind.
    #[must_use]
    pub fn type_method(method: impl Into<String>, kind: ObjectKind) -> Self {
        Self::TypeMethod {
            method: method.into(),
            kind,
        }
    }

    /// Scope for a whole kind.
    #[must_use]
    pub const fn of_type(kind: ObjectKind) -> Self {
        Self::Type { kind }
    }

    /// Builds the scope selected by an instance filter and a method filter,
    /// where [`WILDCARD`] widens the scope.
    ///
    /// # Examples
    ///
    /// ```
    /// use nonstop::{ObjectKind, ScopeKey};
    ///
    /// assert_eq!(ScopeKey::from_filters(ObjectKind::Cache, "*", "*"), ScopeKey::of_type(ObjectKind::Cache));
    /// assert_eq!(
    ///     ScopeKey::from_filters(ObjectKind::Cache, "orders", "*"),
    ///     ScopeKey::instance("orders", ObjectKind::Cache)
    /// );
    /// ```
    #[must_use]
    pub fn from_filters(kind: ObjectKind, instance: &str, method: &str) -> Self {
        match (instance == WILDCARD, method == WILDCARD) {
            (true, true) => Self::of_type(kind),
            (true, false) => Self::type_method(method, kind),
            (false, true) => Self::instance(instance, kind),
            (false, false) => Self::instance_method(method, instance, kind),
        }
    }

    /// Returns the object kind of this scope.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::InstanceMethod { kind, .. } | Self::Instance { kind, .. } | Self::TypeMethod { kind, .. } | Self::Type { kind } => *kind,
        }
    }

    /// Returns the lookup order used to resolve a call, most specific first.
    pub(crate) fn resolution_chain(method: &str, instance: &str, kind: ObjectKind) -> [Self; 4] {
        [
            Self::instance_method(method, instance, kind),
            Self::instance(instance, kind),
            Self::type_method(method, kind),
            Self::of_type(kind),
        ]
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstanceMethod { method, instance, kind } => write!(f, "{kind}/{instance}/{method}"),
            Self::Instance { instance, kind } => write!(f, "{kind}/{instance}/{WILDCARD}"),
            Self::TypeMethod { method, kind } => write!(f, "{kind}/{WILDCARD}/{method}"),
            Self::Type { kind } => write!(f, "{kind}/{WILDCARD}/{WILDCARD}"),
        }
    }
}
