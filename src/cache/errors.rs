//! Cache error types

use thiserror::Error;

/// Errors raised by a cache store.
///
/// The composite [`Cache`](super::Cache) absorbs `Backend` errors by falling back to its
/// in-process map, so callers normally only see `NotAnInteger` or `Overflow`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Value at key '{0}' is not an integer")]
    NotAnInteger(String),

    #[error("Increment at key '{0}' would overflow")]
    Overflow(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
