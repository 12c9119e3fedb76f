// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_TIMEOUT, Error, NonStopPolicyBuilder, ObjectKind, PolicyRegistry, TimeoutBehavior, WILDCARD};

/// Serializable form of a policy registration.
///
/// Missing fields take the builder defaults. Applying a config goes through
/// [`NonStopPolicyBuilder`], so it is validated exactly like code-built policies.
///
/// # Examples
///
/// ```
/// use nonstop::{NonStopConfig, ObjectKind, PolicyRegistry, TimeoutBehavior};
///
/// let config: NonStopConfig = serde_json::from_str(
///     r#"{ "timeout_millis": 50, "timeout_behavior": "local_reads", "instance_names": ["orders"] }"#,
/// )?;
///
/// let registry = PolicyRegistry::new();
/// config.apply(&registry)?;
///
/// let policy = registry.resolve("get", "orders", ObjectKind::Cache);
/// assert_eq!(policy.behavior(), TimeoutBehavior::LocalReads);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonStopConfig {
    /// Per-call timeout in milliseconds.
    pub timeout_millis: u64,
    /// What happens when the timeout elapses.
    pub timeout_behavior: TimeoutBehavior,
    /// Object kinds to target.
    pub object_kinds: Vec<ObjectKind>,
    /// Instance name filters; `"*"` matches every instance.
    pub instance_names: Vec<String>,
    /// Method name filters; `"*"` matches every method.
    pub method_names: Vec<String>,
    /// Dedicated timeout for search-class calls, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_timeout_millis: Option<u64>,
}

impl Default for NonStopConfig {
    fn default() -> Self {
        Self {
            timeout_millis: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            timeout_behavior: TimeoutBehavior::default(),
            object_kinds: ObjectKind::SUPPORTED.to_vec(),
            instance_names: vec![WILDCARD.to_owned()],
            method_names: vec![WILDCARD.to_owned()],
            search_timeout_millis: None,
        }
    }
}

impl NonStopConfig {
    /// Converts the config into a builder.
    ///
    /// # Errors
    ///
    /// Returns the same errors as the corresponding builder setters.
    pub fn to_builder(&self) -> Result<NonStopPolicyBuilder, Error> {
        let builder = NonStopPolicyBuilder::new()
            .timeout_millis(self.timeout_millis)
            .behavior(self.timeout_behavior)
            .kinds(self.object_kinds.iter().copied())?
            .instance_names(self.instance_names.iter().cloned())?
            .method_names(self.method_names.iter().cloned())?;

        Ok(match self.search_timeout_millis {
            Some(millis) => builder.search_timeout(Duration::from_millis(millis)),
            None => builder,
        })
    }

    /// Validates and registers the config.
    ///
    /// # Errors
    ///
    /// Returns a configuration or unsupported-kind error; nothing is registered in that case.
    pub fn apply(&self, registry: &PolicyRegistry) -> Result<(), Error> {
        self.to_builder()?.apply(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn empty_document_yields_defaults() {
        let config: NonStopConfig = serde_json::from_str("{}").unwrap();
        pretty_assertions::assert_eq!(config, NonStopConfig::default());
        assert_eq!(config.timeout_millis, 30_000);
    }

    #[test]
    fn serializes_snake_case_names() {
        let config = NonStopConfig {
            timeout_behavior: TimeoutBehavior::LocalMethods,
            object_kinds: vec![ObjectKind::Cache],
            ..NonStopConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout_behavior"], "local_methods");
        assert_eq!(json["object_kinds"][0], "cache");
        assert!(json.get("search_timeout_millis").is_none());
    }

    #[test]
    fn unsupported_kind_is_rejected_on_apply() {
        let config: NonStopConfig = serde_json::from_str(r#"{ "object_kinds": ["cache", "map"] }"#).unwrap();
        let registry = PolicyRegistry::new();

        let err = config.apply(&registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedKind);
        assert!(registry.config_for_type(ObjectKind::Cache).is_none());
    }

    #[test]
    fn empty_kind_list_is_rejected_on_apply() {
        let config: NonStopConfig = serde_json::from_str(r#"{ "object_kinds": [] }"#).unwrap();
        let registry = PolicyRegistry::new();

        let err = config.apply(&registry).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(registry.config_for_type(ObjectKind::Store).is_none());
    }

    #[test]
    fn search_timeout_is_carried_over() {
        let config = NonStopConfig {
            search_timeout_millis: Some(75),
            instance_names: vec!["orders".into()],
            ..NonStopConfig::default()
        };
        let registry = PolicyRegistry::new();
        config.apply(&registry).unwrap();

        assert_eq!(
            registry.timeout_for_search("orders", ObjectKind::Store),
            Duration::from_millis(75)
        );
    }
}
