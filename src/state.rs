//! UI-owned cache of the latest snapshot

use crate::subscription::Snapshot;

/// Latest snapshot of one subscription, owned by a single presentation scope.
///
/// Every accepted snapshot replaces the records wholesale; snapshots whose
/// version is not newer than the held one are ignored, so a late delivery can
/// never roll the state back.
#[derive(Debug, Clone)]
pub struct DomainState<T> {
    version: u64,
    records: Vec<T>,
}

impl<T> Default for DomainState<T> {
    fn default() -> Self {
        Self {
            version: 0,
            records: Vec::new(),
        }
    }
}

impl<T> DomainState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a delivery. Returns whether the state changed.
    pub fn apply(&mut self, snapshot: Snapshot<T>) -> bool {
        if snapshot.version <= self.version {
            return false;
        }
        self.version = snapshot.version;
        self.records = snapshot.records;
        true
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find<P>(&self, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.records.iter().find(|r| predicate(r))
    }

    /// Drop the cached records, e.g. when the owning scope unmounts.
    pub fn clear(&mut self) {
        self.version = 0;
        self.records.clear();
    }
}
