//! ResourceKey - identifier of one fetchable data category

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use crate::ContractError;

/// Opaque, comparable, hashable resource identifier.
///
/// Implemented for every type that satisfies the bounds, so `String`,
/// `&'static str` and plain enums can be used directly.
pub trait ResourceKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> ResourceKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Check that a key set is non-empty and duplicate-free.
///
/// # Errors
/// - `ContractError::EmptyKeySet` for an empty slice
/// - `ContractError::DuplicateKey` naming the first repeated key
pub fn validate_key_set<K: ResourceKey>(keys: &[K]) -> Result<HashSet<K>, ContractError> {
    if keys.is_empty() {
        return Err(ContractError::EmptyKeySet);
    }

    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key.clone()) {
            return Err(ContractError::duplicate_key(key));
        }
    }
    Ok(seen)
}
