// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::sync::Arc;

/// Boxed error produced by value factories and disposal hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error from a cache operation.
///
/// Errors are cheap to clone because a single creation failure is handed to every
/// caller that was waiting on the same key.
///
/// # Example
///
/// ```
/// use cachewheel::Error;
///
/// let error = Error::create_faulted("backend unavailable");
/// assert!(error.to_string().contains("backend unavailable"));
/// ```
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The value factory failed; the failure is shared with every deduplicated waiter.
    #[error("failed to create the cached value: {0}")]
    CreateFaulted(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// The creation task was dropped before it produced a value.
    #[error("value creation was abandoned before it completed")]
    Abandoned,

    /// A lookup without a factory did not find the key.
    #[error("the key was not found in the index")]
    KeyNotFound,

    /// An index with the same name is already registered on the cache.
    #[error("an index named `{0}` already exists")]
    DuplicateIndex(String),

    /// An index exists under this name but was created for a different key type.
    #[error("the index `{0}` uses a different key type")]
    IndexTypeMismatch(String),

    /// The cache settings failed validation.
    #[error("invalid cache settings: {0}")]
    InvalidSettings(&'static str),

    /// No spawner was configured and no Tokio runtime was available.
    #[error("no spawner was configured and no Tokio runtime is running")]
    NoRuntime,
}

impl Error {
    /// Wraps a factory failure.
    pub fn create_faulted(cause: impl Into<BoxError>) -> Self {
        Self::CreateFaulted(Arc::from(cause.into()))
    }
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
