//! ResourceFetcher trait - Fetch worker input interface
//!
//! Single-method capability the dispatcher calls once per key and round.

use std::future::Future;

use thiserror::Error;

/// Error a fetcher may return.
///
/// Never escapes a fetch worker: the worker logs it and turns it into an
/// empty result list.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Fetch ran and failed
    #[error("fetch failed for '{key}': {message}")]
    Failed { key: String, message: String },

    /// Backing store not reachable
    #[error("resource store unavailable: {0}")]
    Unavailable(String),

    /// Error from the backing library
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FetchError {
    /// Create a fetch failure for `key`
    pub fn failed(key: &impl std::fmt::Debug, message: impl Into<String>) -> Self {
        Self::Failed {
            key: format!("{key:?}"),
            message: message.into(),
        }
    }
}

/// Fetch capability
///
/// Implementations perform one asynchronous fetch for one key. Errors are
/// allowed (they are converted to an empty result by the caller), but an
/// implementation should not rely on that for control flow.
#[trait_variant::make(ResourceFetcher: Send)]
pub trait LocalResourceFetcher<K, R> {
    /// Fetch all records for `key`
    async fn fetch(&self, key: &K) -> Result<Vec<R>, FetchError>;
}

/// Adapts an async closure `Fn(K) -> Future<Output = Result<Vec<R>, FetchError>>`
/// into a [`ResourceFetcher`].
///
/// ```ignore
/// let fetcher = FnFetcher::new(|key: String| async move {
///     store.read(&key).await.map_err(|e| FetchError::failed(&key, e.to_string()))
/// });
/// ```
pub struct FnFetcher<F>(F);

impl<F> FnFetcher<F> {
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<K, R, F, Fut> ResourceFetcher<K, R> for FnFetcher<F>
where
    K: Clone + Sync,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<R>, FetchError>> + Send,
{
    async fn fetch(&self, key: &K) -> Result<Vec<R>, FetchError> {
        (self.0)(key.clone()).await
    }
}
