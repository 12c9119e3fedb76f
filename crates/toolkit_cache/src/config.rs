// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};
use toolkit_store::{DEFAULT_ON_HEAP_CAPACITY, StoreSettings};
use toolkit_tier::ExpiryDefaults;

/// Serializable sizing and expiry of a cache's local tiers.
///
/// Missing fields take their defaults: 10 000 on-heap entries, no off-heap
/// tier, and entries that never expire.
///
/// # Examples
///
/// ```
/// use toolkit_cache::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "on_heap_capacity": 500, "default_ttl_secs": 60 }"#)?;
///
/// assert_eq!(config.on_heap_capacity, 500);
/// assert_eq!(config.off_heap_capacity_bytes, 0);
/// assert_eq!(config.default_ttl_secs, 60);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries held on-heap.
    pub on_heap_capacity: usize,
    /// Byte budget of the off-heap tier; zero disables it.
    pub off_heap_capacity_bytes: usize,
    /// Time to idle in seconds; zero means never.
    pub default_tti_secs: u32,
    /// Time to live in seconds; zero means never.
    pub default_ttl_secs: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            on_heap_capacity: DEFAULT_ON_HEAP_CAPACITY,
            off_heap_capacity_bytes: 0,
            default_tti_secs: 0,
            default_ttl_secs: 0,
        }
    }
}

impl From<CacheConfig> for StoreSettings {
    fn from(config: CacheConfig) -> Self {
        Self {
            on_heap_capacity: config.on_heap_capacity,
            off_heap_capacity_bytes: config.off_heap_capacity_bytes,
            expiry: ExpiryDefaults {
                tti: config.default_tti_secs,
                ttl: config.default_ttl_secs,
            },
        }
    }
}
