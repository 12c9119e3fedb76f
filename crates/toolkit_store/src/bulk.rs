// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use toolkit_tier::Error;

/// Outcome of a bulk removal.
///
/// Keys are removed one at a time; a failure for one key does not undo the
/// keys removed before it.
#[derive(Debug)]
pub struct BulkRemoval<K> {
    removed: Vec<K>,
    failures: Vec<(K, Error)>,
}

impl<K> Default for BulkRemoval<K> {
    fn default() -> Self {
        Self {
            removed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<K> BulkRemoval<K> {
    pub(crate) fn record(&mut self, key: K, outcome: Result<(), Error>) {
        match outcome {
            Ok(()) => self.removed.push(key),
            Err(error) => self.failures.push((key, error)),
        }
    }

    /// Keys that were removed.
    #[must_use]
    pub fn removed(&self) -> &[K] {
        &self.removed
    }

    /// Keys that could not be removed, with the reason.
    #[must_use]
    pub fn failures(&self) -> &[(K, Error)] {
        &self.failures
    }

    /// Returns `true` when every key was removed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Splits the outcome into removed keys and failures.
    #[must_use]
    pub fn into_parts(self) -> (Vec<K>, Vec<(K, Error)>) {
        (self.removed, self.failures)
    }
}
