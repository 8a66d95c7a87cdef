// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`Spawner`] for running cache maintenance off the caller's path.

use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Error, Result};

pub(crate) type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type SpawnFn = dyn Fn(BoxedFuture) + Send + Sync;

/// Runtime-agnostic dispatcher for the cache's background work.
///
/// Value creation, node removal and cleanup passes are all handed to the spawner as
/// fire-and-forget tasks. Their outcome is only observable through observers and statistics.
///
/// # Examples
///
/// Using Tokio:
///
/// ```rust
/// use cachewheel::Spawner;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let spawner = Spawner::new_tokio();
/// # let _ = spawner;
/// # }
/// ```
///
/// ## Custom runtime
///
/// ```rust
/// use cachewheel::Spawner;
///
/// let spawner = Spawner::new_custom(|fut| {
///     std::thread::spawn(move || futures::executor::block_on(fut));
/// });
/// # let _ = spawner;
/// ```
#[derive(Debug, Clone)]
pub struct Spawner(SpawnerKind);

#[derive(Clone)]
enum SpawnerKind {
    Tokio(tokio::runtime::Handle),
    Custom(Arc<SpawnFn>),
}

impl Debug for SpawnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tokio(_) => f.write_str("Tokio"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl Spawner {
    /// Creates a spawner bound to the Tokio runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context. Use [`Spawner::try_new_tokio`]
    /// to get an error instead.
    #[must_use]
    pub fn new_tokio() -> Self {
        Self(SpawnerKind::Tokio(tokio::runtime::Handle::current()))
    }

    /// Creates a spawner bound to the current Tokio runtime, if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] when called outside of a Tokio runtime context.
    pub fn try_new_tokio() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(|handle| Self(SpawnerKind::Tokio(handle)))
            .map_err(|_no_runtime| Error::NoRuntime)
    }

    /// Creates a spawner bound to a specific Tokio runtime.
    #[must_use]
    pub fn from_tokio_handle(handle: tokio::runtime::Handle) -> Self {
        Self(SpawnerKind::Tokio(handle))
    }

    /// Creates a custom spawner from a closure.
    ///
    /// The closure receives a boxed, pinned future and is responsible for driving it to
    /// completion.
    pub fn new_custom<F>(f: F) -> Self
    where
        F: Fn(BoxedFuture) + Send + Sync + 'static,
    {
        Self(SpawnerKind::Custom(Arc::new(f)))
    }

    /// Dispatches a unit of background work. The caller never waits for it.
    pub(crate) fn spawn(&self, work: impl Future<Output = ()> + Send + 'static) {
        match &self.0 {
            SpawnerKind::Tokio(handle) => {
                drop(handle.spawn(work));
            }
            SpawnerKind::Custom(spawn) => spawn(Box::pin(work)),
        }
    }
}
