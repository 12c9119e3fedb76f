// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Converts a wall-clock time to whole seconds since the Unix epoch.
///
/// Times before the epoch map to zero and times beyond `u32::MAX` saturate.
#[must_use]
pub fn epoch_secs(time: SystemTime) -> u32 {
    let secs = time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Timing metadata shared by local and cluster representations of an entry.
///
/// All values are whole seconds. A custom TTI or TTL of zero means the
/// cache-wide default applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryMetadata {
    create_time: u32,
    custom_tti: u32,
    custom_ttl: u32,
}

impl EntryMetadata {
    /// Creates metadata for an entry created at `create_time` with no custom expiry.
    #[must_use]
    pub const fn new(create_time: u32) -> Self {
        Self {
            create_time,
            custom_tti: 0,
            custom_ttl: 0,
        }
    }

    /// Creates metadata with explicit per-entry time-to-idle and time-to-live.
    #[must_use]
    pub const fn with_expiry(create_time: u32, custom_tti: u32, custom_ttl: u32) -> Self {
        Self {
            create_time,
            custom_tti,
            custom_ttl,
        }
    }

    /// Returns the creation time in epoch seconds.
    #[must_use]
    pub const fn create_time(&self) -> u32 {
        self.create_time
    }

    /// Returns the per-entry time-to-idle, zero when the cache default applies.
    #[must_use]
    pub const fn custom_tti(&self) -> u32 {
        self.custom_tti
    }

    /// Returns the per-entry time-to-live, zero when the cache default applies.
    #[must_use]
    pub const fn custom_ttl(&self) -> u32 {
        self.custom_ttl
    }
}

/// Cache-wide expiry defaults in seconds. Zero disables the corresponding limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpiryDefaults {
    /// Default time-to-idle.
    pub tti: u32,
    /// Default time-to-live.
    pub ttl: u32,
}

/// A locally held value with its timing metadata.
///
/// `CacheEntry` tracks when the value was created and last accessed so that
/// tiers can decide expiry lazily on read or during a sweep.
///
/// # Examples
///
/// ```
/// use toolkit_tier::{CacheEntry, EntryMetadata, ExpiryDefaults};
///
/// let entry = CacheEntry::new(42, EntryMetadata::with_expiry(100, 0, 10));
/// let defaults = ExpiryDefaults::default();
///
/// assert!(!entry.is_expired(105, defaults));
/// assert!(entry.is_expired(110, defaults));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    metadata: EntryMetadata,
    last_access: u32,
}

impl<V> CacheEntry<V> {
    /// Creates a new entry. The last access time starts at the creation time.
    pub fn new(value: V, metadata: EntryMetadata) -> Self {
        Self {
            value,
            last_access: metadata.create_time,
            metadata,
        }
    }

    /// Returns a reference to the value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns the timing metadata.
    #[must_use]
    pub fn metadata(&self) -> EntryMetadata {
        self.metadata
    }

    /// Returns the last access time in epoch seconds.
    #[must_use]
    pub fn last_access(&self) -> u32 {
        self.last_access
    }

    /// Records an access at `now`. Quiet reads must not call this.
    pub fn touch(&mut self, now: u32) {
        self.last_access = self.last_access.max(now);
    }

    /// Returns the epoch second at which this entry expires, or `None` if it never does.
    ///
    /// Per-entry values take precedence over `defaults`. When both a TTI and a
    /// TTL apply, the earlier deadline wins.
    #[must_use]
    pub fn expires_at(&self, defaults: ExpiryDefaults) -> Option<u64> {
        let ttl = effective(self.metadata.custom_ttl, defaults.ttl);
        let tti = effective(self.metadata.custom_tti, defaults.tti);

        let by_ttl = ttl.map(|ttl| u64::from(self.metadata.create_time) + u64::from(ttl));
        let by_tti = tti.map(|tti| u64::from(self.last_access) + u64::from(tti));

        match (by_ttl, by_tti) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Returns `true` when the entry is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: u32, defaults: ExpiryDefaults) -> bool {
        self.expires_at(defaults).is_some_and(|at| u64::from(now) >= at)
    }

    /// Maps the value while keeping the metadata and access time.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> CacheEntry<U> {
        CacheEntry {
            value: f(self.value),
            metadata: self.metadata,
            last_access: self.last_access,
        }
    }
}

fn effective(custom: u32, default: u32) -> Option<u32> {
    match (custom, default) {
        (0, 0) => None,
        (0, default) => Some(default),
        (custom, _) => Some(custom),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;

    #[test]
    fn epoch_secs_saturates_and_floors() {
        assert_eq!(epoch_secs(UNIX_EPOCH), 0);
        assert_eq!(epoch_secs(UNIX_EPOCH + Duration::from_millis(1_500)), 1);
        assert_eq!(epoch_secs(UNIX_EPOCH + Duration::from_secs(u64::from(u32::MAX) + 10)), u32::MAX);
    }

    #[test]
    fn eternal_without_limits() {
        let entry = CacheEntry::new("v", EntryMetadata::new(100));
        assert_eq!(entry.expires_at(ExpiryDefaults::default()), None);
        assert!(!entry.is_expired(u32::MAX, ExpiryDefaults::default()));
    }

    #[rstest]
    #[case::custom_ttl_wins(EntryMetadata::with_expiry(100, 0, 5), Some(105))]
    #[case::default_ttl_fills_in(EntryMetadata::new(100), Some(160))]
    #[case::custom_tti_with_default_ttl(EntryMetadata::with_expiry(100, 20, 0), Some(120))]
    fn custom_values_override_defaults(#[case] metadata: EntryMetadata, #[case] expected: Option<u64>) {
        let entry = CacheEntry::new("v", metadata);
        let defaults = ExpiryDefaults { tti: 0, ttl: 60 };
        assert_eq!(entry.expires_at(defaults), expected);
    }

    #[test]
    fn touch_extends_idle_deadline() {
        let mut entry = CacheEntry::new("v", EntryMetadata::with_expiry(100, 10, 0));
        assert_eq!(entry.expires_at(ExpiryDefaults::default()), Some(110));

        entry.touch(108);
        assert_eq!(entry.last_access(), 108);
        assert_eq!(entry.expires_at(ExpiryDefaults::default()), Some(118));

        entry.touch(50);
        assert_eq!(entry.last_access(), 108, "access time never moves backwards");
    }

    #[test]
    fn earlier_of_tti_and_ttl_wins() {
        let mut entry = CacheEntry::new("v", EntryMetadata::with_expiry(100, 10, 15));
        entry.touch(109);
        assert_eq!(entry.expires_at(ExpiryDefaults::default()), Some(115));
        assert!(entry.is_expired(115, ExpiryDefaults::default()));
        assert!(!entry.is_expired(114, ExpiryDefaults::default()));
    }

    #[test]
    fn map_keeps_metadata() {
        let entry = CacheEntry::new(2, EntryMetadata::with_expiry(7, 1, 2)).map(|v| v * 10);
        assert_eq!(*entry.value(), 20);
        assert_eq!(entry.metadata(), EntryMetadata::with_expiry(7, 1, 2));
    }
}
