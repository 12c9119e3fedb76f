// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// Where a key currently resides, as reported by a tiered store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TierLocation {
    /// In the fast on-heap tier.
    OnHeap,
    /// In the serialized off-heap tier.
    OffHeap,
    /// Only in the cluster, not held locally.
    RemoteOnly,
    /// Nowhere.
    #[default]
    Absent,
}

impl TierLocation {
    /// Returns `true` for the local tiers.
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::OnHeap | Self::OffHeap)
    }

    /// Returns a stable, lowercase name for the location.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnHeap => "on_heap",
            Self::OffHeap => "off_heap",
            Self::RemoteOnly => "remote_only",
            Self::Absent => "absent",
        }
    }
}

impl fmt::Display for TierLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
