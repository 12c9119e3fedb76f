// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use toolkit_tier::ExpiryDefaults;

/// Number of entries the on-heap tier holds unless configured otherwise.
pub const DEFAULT_ON_HEAP_CAPACITY: usize = 10_000;

/// Sizing and expiry of a store's local tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Maximum number of entries held on-heap; must be positive.
    pub on_heap_capacity: usize,
    /// Byte budget of the off-heap tier; zero disables it.
    pub off_heap_capacity_bytes: usize,
    /// Store-wide TTI and TTL used by entries that do not carry their own.
    pub expiry: ExpiryDefaults,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            on_heap_capacity: DEFAULT_ON_HEAP_CAPACITY,
            off_heap_capacity_bytes: 0,
            expiry: ExpiryDefaults::default(),
        }
    }
}
