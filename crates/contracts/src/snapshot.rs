//! Snapshot - Aggregator output
//!
//! Immutable aggregation state and the update message that produces it.

use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ResourceKey;

/// Ordered results of one fetch for one key.
///
/// Empty is meaningful: fetched and nothing found, or the fetch failed and
/// was converted at the worker boundary.
pub type ResultList<R> = Arc<[R]>;

/// Update sent from a worker (or a manual caller) to the aggregator
pub struct UpdateMessage<K, R> {
    /// Resource key the results belong to
    pub key: K,

    /// Results of the fetch
    pub results: ResultList<R>,
}

impl<K, R> UpdateMessage<K, R> {
    /// Create update message
    pub fn new(key: K, results: impl Into<ResultList<R>>) -> Self {
        Self {
            key,
            results: results.into(),
        }
    }

    /// Create update carrying an empty result list
    pub fn empty(key: K) -> Self {
        Self {
            key,
            results: Arc::from(Vec::new()),
        }
    }

    /// Number of records carried
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the update carries no records
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl<K: Clone, R> Clone for UpdateMessage<K, R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            results: Arc::clone(&self.results),
        }
    }
}

impl<K: fmt::Debug, R> fmt::Debug for UpdateMessage<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateMessage")
            .field("key", &self.key)
            .field("results", &self.results.len())
            .finish()
    }
}

/// Immutable aggregation state
///
/// Every accepted update produces a new `Snapshot`; older snapshots stay
/// valid for whoever still holds them. Cloning is cheap (shared map).
///
/// Two snapshots compare equal when they map the same keys to equal result
/// lists; `version` is not part of the comparison.
pub struct Snapshot<K, R> {
    entries: Arc<HashMap<K, ResultList<R>>>,
    version: u64,
}

impl<K: ResourceKey, R> Snapshot<K, R> {
    /// Empty snapshot (version 0)
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
            version: 0,
        }
    }

    /// Copy-on-write update: returns a new snapshot with `key` set to
    /// `results` and the version bumped. `self` is left untouched.
    pub fn with_update(&self, key: K, results: ResultList<R>) -> Self {
        let mut entries = HashMap::clone(&self.entries);
        entries.insert(key, results);
        Self {
            entries: Arc::new(entries),
            version: self.version + 1,
        }
    }

    /// Number of accepted updates this snapshot reflects
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Results recorded for `key`
    pub fn get(&self, key: &K) -> Option<&[R]> {
        self.entries.get(key).map(|results| &results[..])
    }

    /// Shared result list recorded for `key`
    pub fn get_shared(&self, key: &K) -> Option<ResultList<R>> {
        self.entries.get(key).cloned()
    }

    /// Whether `key` has been set
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys set
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key has been set yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys set so far (arbitrary order)
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// Iterate entries (arbitrary order)
    pub fn iter(&self) -> impl Iterator<Item = (&K, &[R])> {
        self.entries.iter().map(|(k, v)| (k, &v[..]))
    }

    /// Total number of records across all keys
    pub fn total_records(&self) -> usize {
        self.entries.values().map(|v| v.len()).sum()
    }

    /// Owned copy of the entries
    pub fn to_map(&self) -> HashMap<K, Vec<R>>
    where
        R: Clone,
    {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_vec()))
            .collect()
    }
}

impl<K: ResourceKey, R> Default for Snapshot<K, R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K, R> Clone for Snapshot<K, R> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            version: self.version,
        }
    }
}

impl<K: ResourceKey, R: PartialEq> PartialEq for Snapshot<K, R> {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.entries, &other.entries) {
            return true;
        }
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.entries.get(k).is_some_and(|o| o[..] == v[..]))
    }
}

impl<K: fmt::Debug, R: fmt::Debug> fmt::Debug for Snapshot<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("entries", &self.entries)
            .finish()
    }
}

impl<K: Serialize, R: Serialize> Serialize for Snapshot<K, R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(k, v)| (k, &v[..])))
    }
}
