// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::builder::CacheBuilder;
use crate::observer::{CacheValueObserver, ConnectHandle};
use crate::statistics::StatisticsSnapshot;
use crate::tracker::{NodeTracker, Snapshot};
use crate::{Error, Index, Node, Result};

type Indices = Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>;

/// A self-expiring in-memory cache with any number of named indices.
///
/// Values are kept in time buckets. Once the cache grows past its capacity, or values outlive
/// the configured max age, background cleanup passes evict the oldest buckets. Reading a value
/// through an [`Index`] keeps it alive by moving it into the current bucket.
///
/// Cloning a cache is inexpensive and every clone refers to the same values.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachewheel::{BoxError, Cache};
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct Product {
///     sku: String,
///     price: u32,
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cachewheel::Error> {
/// let cache = Cache::<Product>::builder()
///     .capacity(1_000)
///     .max_age(Duration::from_secs(300))
///     .build()?;
///
/// let by_sku = cache.add_index("sku", |product: &Product| product.sku.clone())?;
///
/// let product = by_sku
///     .get("A-1".to_string(), |sku| async move {
///         Ok::<_, BoxError>(Product { sku, price: 12 })
///     })
///     .await?;
///
/// assert_eq!(product.price, 12);
/// assert_eq!(cache.statistics().count, 1);
/// # Ok(())
/// # }
/// ```
pub struct Cache<V> {
    tracker: NodeTracker<V>,
    indices: Arc<Indices>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            indices: Arc::clone(&self.indices),
        }
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Starts configuring a new cache.
    #[must_use]
    pub fn builder() -> CacheBuilder<V> {
        CacheBuilder::new()
    }

    pub(crate) fn from_tracker(tracker: NodeTracker<V>) -> Self {
        Self {
            tracker,
            indices: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates an index named `name` that maps each value to the key `key_provider` derives.
    ///
    /// Values already in the cache are not mapped retroactively; the index sees values added
    /// from now on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateIndex`] if an index with this name already exists.
    pub fn add_index<K>(&self, name: impl Into<String>, key_provider: impl Fn(&V) -> K + Send + Sync + 'static) -> Result<Index<K, V>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let name = name.into();
        let mut indices = self.indices.lock();

        match indices.entry(name) {
            Entry::Occupied(occupied) => Err(Error::DuplicateIndex(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                let index = Index::new(vacant.key().clone(), self.tracker.clone(), key_provider);
                vacant.insert(Box::new(index.clone()));
                Ok(index)
            }
        }
    }

    /// Returns the index registered under `name`, if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexTypeMismatch`] if the index was created with a different key type.
    pub fn index<K>(&self, name: &str) -> Result<Option<Index<K, V>>>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let indices = self.indices.lock();
        let Some(index) = indices.get(name) else {
            return Ok(None);
        };

        index
            .downcast_ref::<Index<K, V>>()
            .map(|index| Some(index.clone()))
            .ok_or_else(|| Error::IndexTypeMismatch(name.to_string()))
    }

    /// Adds a ready value to the cache and returns its node.
    ///
    /// Observers, including every index, are notified before this returns.
    pub fn add(&self, value: V) -> Arc<Node<V>> {
        self.tracker.add_value(value)
    }

    /// Removes `node` from the cache.
    ///
    /// The node stops being served at once; observers are notified and the value is disposed
    /// in the background. Returns `false` if the node had already left the cache.
    pub fn remove(&self, node: &Arc<Node<V>>) -> bool {
        self.tracker.remove(node)
    }

    /// Iterates the values currently in the cache, newest first.
    ///
    /// The iteration is weakly consistent; see [`Snapshot`].
    #[must_use]
    pub fn get_all(&self) -> Snapshot<V> {
        self.tracker.snapshot()
    }

    /// Drops every value and tells observers that the cache was cleared.
    ///
    /// Hit, miss and fault counters start over.
    pub fn clear(&self) {
        self.tracker.clear();
    }

    /// Starts delivering add, remove and clear notifications to `observer`.
    pub fn connect(&self, observer: Arc<dyn CacheValueObserver<V>>) -> ConnectHandle {
        self.tracker.connect(observer)
    }

    /// Returns the cache's current statistics.
    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.tracker.statistics()
    }
}

impl<V> Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.indices.lock().keys().cloned().collect();
        names.sort_unstable();

        f.debug_struct("Cache")
            .field("tracker", &self.tracker)
            .field("indices", &names)
            .finish()
    }
}
