// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Notifications about values entering and leaving the cache.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Node;

/// Receives add, remove and clear notifications from a cache.
///
/// Notifications are delivered on whichever thread or task changed the cache, after the
/// cache's internal lock has been released. Observers may therefore call back into the cache.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use cachewheel::{Cache, CacheValueObserver, Node, Spawner};
///
/// #[derive(Default)]
/// struct Counter(AtomicUsize);
///
/// impl CacheValueObserver<u32> for Counter {
///     fn value_added(&self, _node: &Arc<Node<u32>>, _value: &u32) {
///         self.0.fetch_add(1, Ordering::SeqCst);
///     }
/// }
///
/// let cache = Cache::<u32>::builder()
///     .spawner(Spawner::new_custom(|fut| futures::executor::block_on(fut)))
///     .build()
///     .unwrap();
///
/// let counter = Arc::new(Counter::default());
/// let handle = cache.connect(counter.clone());
///
/// cache.add(1);
/// handle.disconnect();
/// cache.add(2);
///
/// assert_eq!(counter.0.load(Ordering::SeqCst), 1);
/// ```
pub trait CacheValueObserver<V>: Send + Sync {
    /// A value was added to the cache.
    fn value_added(&self, node: &Arc<Node<V>>, value: &V) {
        let _ = (node, value);
    }

    /// A value was evicted or explicitly removed from the cache.
    fn value_removed(&self, node: &Arc<Node<V>>, value: &V) {
        let _ = (node, value);
    }

    /// Every value was dropped from the cache at once.
    fn cache_cleared(&self) {}
}

type Observers<V> = RwLock<HashMap<u64, Arc<dyn CacheValueObserver<V>>>>;

/// The set of observers connected to one cache.
pub(crate) struct ObserverSet<V> {
    next_id: AtomicU64,
    observers: Arc<Observers<V>>,
}

impl<V: 'static> ObserverSet<V> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            observers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub(crate) fn connect(&self, observer: Arc<dyn CacheValueObserver<V>>) -> ConnectHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().insert(id, observer);

        let observers = Arc::downgrade(&self.observers);
        ConnectHandle {
            disconnect: Some(Box::new(move || {
                if let Some(observers) = observers.upgrade() {
                    observers.write().remove(&id);
                }
            })),
        }
    }

    /// Copies the current observers so that none of them runs under the set's lock.
    fn current(&self) -> Vec<Arc<dyn CacheValueObserver<V>>> {
        self.observers.read().values().cloned().collect()
    }

    pub(crate) fn value_added(&self, node: &Arc<Node<V>>) {
        for observer in self.current() {
            observer.value_added(node, node.value());
        }
    }

    pub(crate) fn value_removed(&self, node: &Arc<Node<V>>) {
        for observer in self.current() {
            observer.value_removed(node, node.value());
        }
    }

    pub(crate) fn cache_cleared(&self) {
        for observer in self.current() {
            observer.cache_cleared();
        }
    }
}

impl<V> ObserverSet<V> {
    pub(crate) fn len(&self) -> usize {
        self.observers.read().len()
    }
}

impl<V> Debug for ObserverSet<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.len())
            .finish_non_exhaustive()
    }
}

/// Keeps an observer connected until [`disconnect`](Self::disconnect) is called.
///
/// Dropping the handle leaves the observer connected for the lifetime of the cache.
#[must_use = "the handle is the only way to disconnect the observer"]
pub struct ConnectHandle {
    disconnect: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ConnectHandle {
    /// Stops delivering notifications to the observer.
    pub fn disconnect(mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

impl Debug for ConnectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectHandle").finish_non_exhaustive()
    }
}
