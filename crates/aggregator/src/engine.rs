//! Snapshot accumulator: the state owned by the aggregator loop.

use std::collections::HashSet;

use contracts::{AggregationFault, ResourceKey, Snapshot, UpdateMessage};
use tracing::instrument;

/// Accumulated key -> result list state
///
/// Pure state machine, driven by the aggregator loop one update at a time.
/// Each accepted update replaces the current snapshot with a new one.
#[derive(Debug)]
pub struct SnapshotAccumulator<K, R> {
    /// Session key set
    keys: HashSet<K>,
    /// Latest snapshot
    current: Snapshot<K, R>,
    /// Rejected update count
    rejected: u64,
}

impl<K: ResourceKey, R> SnapshotAccumulator<K, R> {
    /// Create an empty accumulator for a validated key set
    pub fn new(keys: HashSet<K>) -> Self {
        Self {
            keys,
            current: Snapshot::empty(),
            rejected: 0,
        }
    }

    /// Apply one update
    ///
    /// Returns the new snapshot, or the fault that caused the update to be
    /// rejected. A rejected update leaves the current snapshot untouched.
    #[instrument(
        level = "trace",
        name = "accumulator_apply",
        skip(self, update),
        fields(key = ?update.key, results = update.len())
    )]
    pub fn apply(
        &mut self,
        update: UpdateMessage<K, R>,
    ) -> Result<&Snapshot<K, R>, AggregationFault<K>> {
        if let Err(fault) = self.check(&update) {
            self.rejected += 1;
            return Err(fault);
        }

        let UpdateMessage { key, results } = update;
        self.current = self.current.with_update(key, results);
        Ok(&self.current)
    }

    fn check(&self, update: &UpdateMessage<K, R>) -> Result<(), AggregationFault<K>> {
        if !self.keys.contains(&update.key) {
            return Err(AggregationFault::UnknownKey {
                key: update.key.clone(),
            });
        }

        match self.current.get(&update.key) {
            Some(existing) if existing.len() != update.len() => {
                Err(AggregationFault::LengthMismatch {
                    key: update.key.clone(),
                    existing: existing.len(),
                    incoming: update.len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Latest snapshot
    pub fn current(&self) -> &Snapshot<K, R> {
        &self.current
    }

    /// Number of keys in the session
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Keys that have not received an accepted update yet
    pub fn pending_keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter().filter(|k| !self.current.contains_key(k))
    }

    /// Whether every session key has been set
    pub fn is_complete(&self) -> bool {
        self.current.len() == self.keys.len()
    }

    /// Accepted update count
    pub fn accepted_count(&self) -> u64 {
        self.current.version()
    }

    /// Rejected update count
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }
}
