// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Optional resource release for values that leave the cache.

use std::fmt::{self, Debug};
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::BoxError;
use crate::telemetry::{CacheActivity, emit};

/// Synchronous release of the resources held by a cached value.
///
/// Enable it with [`CacheBuilder::disposable`](crate::CacheBuilder::disposable). The cache
/// calls [`dispose`](Self::dispose) after observers have been told that the value was evicted
/// or removed. Failures are logged and otherwise ignored.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use cachewheel::{BoxError, Dispose};
///
/// #[derive(Clone)]
/// struct Connection(Arc<String>);
///
/// impl Dispose for Connection {
///     fn dispose(&self) -> Result<(), BoxError> {
///         println!("closing {}", self.0);
///         Ok(())
///     }
/// }
/// ```
pub trait Dispose {
    /// Releases the value's resources.
    ///
    /// # Errors
    ///
    /// Any error is logged by the cache and then dropped.
    fn dispose(&self) -> Result<(), BoxError>;
}

/// Asynchronous release of the resources held by a cached value.
///
/// Enable it with [`CacheBuilder::async_disposable`](crate::CacheBuilder::async_disposable).
/// The returned future is awaited on the background task that evicted or removed the value.
pub trait AsyncDispose {
    /// Returns a future that releases the value's resources.
    fn dispose_async(&self) -> BoxFuture<'static, Result<(), BoxError>>;
}

type SyncHook<V> = dyn Fn(&V) -> Result<(), BoxError> + Send + Sync;
type AsyncHook<V> = dyn Fn(&V) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;

/// How a value leaving the cache is released.
pub(crate) enum Disposer<V> {
    None,
    Sync(Arc<SyncHook<V>>),
    Async(Arc<AsyncHook<V>>),
}

impl<V: 'static> Disposer<V> {
    pub(crate) fn sync() -> Self
    where
        V: Dispose,
    {
        Self::Sync(Arc::new(|value: &V| value.dispose()))
    }

    pub(crate) fn asynchronous() -> Self
    where
        V: AsyncDispose,
    {
        Self::Async(Arc::new(|value: &V| value.dispose_async()))
    }
}

impl<V> Disposer<V> {
    /// Releases `value`, logging and swallowing any failure.
    pub(crate) async fn dispose(&self, value: &V) {
        let result = match self {
            Self::None => return,
            Self::Sync(hook) => hook(value),
            Self::Async(hook) => hook(value).await,
        };

        if let Err(error) = result {
            emit!(
                CacheActivity::DisposeFailed,
                error = %error,
                "failed to dispose a value that left the cache"
            );
        }
    }
}

impl<V> Clone for Disposer<V> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Sync(hook) => Self::Sync(Arc::clone(hook)),
            Self::Async(hook) => Self::Async(Arc::clone(hook)),
        }
    }
}

impl<V> Debug for Disposer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Sync(_) => f.write_str("Sync"),
            Self::Async(_) => f.write_str("Async"),
        }
    }
}
