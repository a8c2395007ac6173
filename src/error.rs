use std::time::Duration;

use thiserror::Error;

/// An error that happens when loading a resource through the cache.
///
/// This error is remembered by the cache: once a producer fails, every later lookup
/// for the same key surfaces the same error, until the entry is explicitly cleared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The resource was not found at its source.
    #[error("not found")]
    NotFound,
    /// The resource could not be loaded due to missing permissions.
    ///
    /// The attached string contains the source's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The load timed out.
    #[error("load timed out after {0:?}")]
    Timeout(Duration),
    /// The load failed due to another problem, like connection loss or a 5xx
    /// server response.
    ///
    /// The attached string contains the source's response.
    #[error("load failed: {0}")]
    LoadError(String),
    /// The resource was loaded successfully, but is invalid in some way.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error inside the producer itself.
    #[error("internal error")]
    InternalError,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    /// Maps an arbitrary error to [`InternalError`](Self::InternalError), reporting it.
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The outcome of a cache lookup: either the loaded value, or the error the
/// producer failed with.
pub type CacheContents<T = ()> = Result<T, CacheError>;
