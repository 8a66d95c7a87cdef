// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coalesces concurrent misses for the same value into a single creation.
//!
//! The first caller that misses registers a [`PendingValue`] with a fresh
//! [`NodeValueFactory`]; callers that miss on the same key before the value exists register
//! their own pending values with the same factory. The tracker runs the first registered
//! routine exactly once and every registrant receives a clone of its outcome.

use std::collections::VecDeque;
use std::fmt::{self, Debug};

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::{BoxError, Error, Result};

/// The outcome of a creation, shared by every caller waiting for it.
pub(crate) type SharedValue<V> = Shared<BoxFuture<'static, Result<V>>>;

type CreateFn<V> = Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<V, BoxError>> + Send>;

type CompletionFn = Box<dyn FnOnce() + Send>;

/// One caller's routine for creating a missing value.
pub(crate) struct PendingValue<V> {
    create: CreateFn<V>,
}

impl<V: Send + 'static> PendingValue<V> {
    pub(crate) fn new<F, Fut, E>(create: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            create: Box::new(move || create().map(|result| result.map_err(Into::into)).boxed()),
        }
    }
}

impl<V> Debug for PendingValue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingValue").finish_non_exhaustive()
    }
}

/// Creates one value on behalf of every caller that missed on it.
pub(crate) struct NodeValueFactory<V> {
    pending: Mutex<VecDeque<PendingValue<V>>>,
    publish: Mutex<Option<oneshot::Sender<Result<V>>>>,
    completion: Mutex<Option<CompletionFn>>,
    value: SharedValue<V>,
}

impl<V> NodeValueFactory<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(initial: PendingValue<V>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let value = receiver
            .map(|outcome| outcome.unwrap_or(Err(Error::Abandoned)))
            .boxed()
            .shared();

        Self {
            pending: Mutex::new(VecDeque::from([initial])),
            publish: Mutex::new(Some(sender)),
            completion: Mutex::new(None),
            value,
        }
    }

    /// Registers another routine and returns the value every registrant shares.
    ///
    /// Only the first routine ever runs; later ones are dropped once creation starts.
    pub(crate) fn add_pending(&self, pending: PendingValue<V>) -> SharedValue<V> {
        self.pending.lock().push_back(pending);
        self.value()
    }

    pub(crate) fn value(&self) -> SharedValue<V> {
        self.value.clone()
    }

    /// Runs the first registered routine and discards the rest.
    pub(crate) async fn create_value(&self) -> Result<V> {
        let first = {
            let mut pending = self.pending.lock();
            let first = pending.pop_front();
            pending.clear();
            first
        };

        match first {
            Some(pending) => (pending.create)().await.map_err(Error::create_faulted),
            None => Err(Error::Abandoned),
        }
    }

    /// Sets a callback that runs on the creating task once the outcome is known, before any
    /// registrant is woken. It runs even if every registrant has stopped waiting.
    pub(crate) fn on_completion(&self, completion: impl FnOnce() + Send + 'static) {
        *self.completion.lock() = Some(Box::new(completion));
    }

    /// Hands the outcome to every registrant. Only the first call has an effect.
    pub(crate) fn publish(&self, outcome: Result<V>) {
        let Some(sender) = self.publish.lock().take() else {
            return;
        };

        let completion = self.completion.lock().take();
        if let Some(completion) = completion {
            completion();
        }

        // Nobody may be waiting any more, which is fine.
        let _ = sender.send(outcome);
    }
}

impl<V> Debug for NodeValueFactory<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeValueFactory")
            .field("pending", &self.pending.lock().len())
            .field("published", &self.publish.lock().is_none())
            .field("has_completion", &self.completion.lock().is_some())
            .finish_non_exhaustive()
    }
}
