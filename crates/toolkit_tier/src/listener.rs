// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Receives notifications about keys leaving a store's local tiers.
///
/// Callbacks run on a notifier task, never on the thread that triggered the
/// event, and are delivered in the order the events occurred. A panicking
/// listener is logged and does not stop delivery to the others.
pub trait CacheListener<K>: Send + Sync + 'static {
    /// Called once for each key evicted from local memory for capacity.
    fn on_eviction(&self, key: &K);

    /// Called once for each key dropped because its TTI or TTL elapsed.
    fn on_expiration(&self, key: &K);
}
