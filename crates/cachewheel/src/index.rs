// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::observer::{CacheValueObserver, ConnectHandle};
use crate::pending::{NodeValueFactory, PendingValue, SharedValue};
use crate::tracker::NodeTracker;
use crate::{BoxError, Error, Node, Result};

type KeyProvider<K, V> = dyn Fn(&V) -> K + Send + Sync;

enum IndexEntry<V> {
    /// A value for the key is being created.
    Pending(Arc<NodeValueFactory<V>>),
    /// The node holding the value for the key.
    Node(Arc<Node<V>>),
}

impl<V> IndexEntry<V> {
    fn is_pending_for(&self, factory: &Weak<NodeValueFactory<V>>) -> bool {
        matches!(self, Self::Pending(pending) if std::ptr::eq(Arc::as_ptr(pending), factory.as_ptr()))
    }

    fn is_node(&self, node: &Arc<Node<V>>) -> bool {
        matches!(self, Self::Node(mapped) if Arc::ptr_eq(mapped, node))
    }
}

struct IndexInner<K, V> {
    name: String,
    key_provider: Box<KeyProvider<K, V>>,
    entries: DashMap<K, IndexEntry<V>, ahash::RandomState>,
    tracker: NodeTracker<V>,
    connection: OnceLock<ConnectHandle>,
}

impl<K, V> Drop for IndexInner<K, V> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.disconnect();
        }
    }
}

/// Looks up cached values by a key derived from each value.
///
/// Every value added to the cache, whichever index or path it came from, is mapped under the
/// key the index's key provider derives from it. Several indices over one cache share the
/// same values; when the cache evicts a value, every index forgets it.
///
/// Created by [`Cache::add_index`](crate::Cache::add_index). Cloning an index is inexpensive
/// and every clone shares the same mapping.
///
/// # Examples
///
/// ```
/// use cachewheel::{BoxError, Cache};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cachewheel::Error> {
/// let cache = Cache::<(u32, String)>::builder().build()?;
/// let by_id = cache.add_index("id", |(id, _): &(u32, String)| *id)?;
///
/// let user = by_id
///     .get(7, |id| async move { Ok::<_, BoxError>((id, format!("user {id}"))) })
///     .await?;
/// assert_eq!(user.1, "user 7");
///
/// // Served from the cache from now on.
/// assert_eq!(by_id.try_get(&7).map(|(_, name)| name), Some("user 7".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct Index<K, V> {
    inner: Arc<IndexInner<K, V>>,
}

impl<K, V> Clone for Index<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// What a lookup found before any waiting happens.
enum Lookup<V> {
    Hit(Arc<Node<V>>),
    Join(Arc<NodeValueFactory<V>>, SharedValue<V>),
    Create(Arc<NodeValueFactory<V>>, SharedValue<V>),
}

impl<K, V> Index<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: String, tracker: NodeTracker<V>, key_provider: impl Fn(&V) -> K + Send + Sync + 'static) -> Self {
        let index = Self {
            inner: Arc::new(IndexInner {
                name,
                key_provider: Box::new(key_provider),
                entries: DashMap::with_hasher(ahash::RandomState::new()),
                tracker,
                connection: OnceLock::new(),
            }),
        };

        // The tracker only holds a weak reference so that the index does not keep itself alive.
        let observer = IndexObserver {
            index: Arc::downgrade(&index.inner),
        };
        let connection = index.inner.tracker.connect(Arc::new(observer));
        let _ = index.inner.connection.set(connection);

        index
    }

    /// Returns the name the index was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the number of mapped keys, including keys whose value is still being created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if no keys are mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Returns the value for `key`, creating it with `factory` on a miss.
    ///
    /// Concurrent misses on the same key share a single call to the first caller's factory,
    /// and every caller receives its outcome. A hit moves the value into the current time
    /// bucket if it was read after its bucket closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CreateFaulted`] if the factory failed and [`Error::Abandoned`] if the
    /// creation task was dropped. Failures are not cached; the next lookup tries again.
    pub async fn get<F, Fut, E>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let create_key = key.clone();
        let pending = PendingValue::new(move || factory(create_key));

        let lookup = match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                IndexEntry::Node(node) if node.is_valid() => Lookup::Hit(Arc::clone(node)),
                IndexEntry::Pending(existing) => {
                    let shared = existing.add_pending(pending);
                    Lookup::Join(Arc::clone(existing), shared)
                }
                IndexEntry::Node(_) => {
                    let created = self.start_creation(key.clone(), pending);
                    occupied.insert(IndexEntry::Pending(Arc::clone(&created)));
                    Lookup::Create(Arc::clone(&created), created.value())
                }
            },
            Entry::Vacant(vacant) => {
                let created = self.start_creation(key.clone(), pending);
                vacant.insert(IndexEntry::Pending(Arc::clone(&created)));
                Lookup::Create(Arc::clone(&created), created.value())
            }
        };

        // The entry guard is gone by now; creation may run inline and update the mapping.
        let (factory, shared) = match lookup {
            Lookup::Hit(node) => return Ok(self.hit(&node)),
            Lookup::Join(factory, shared) => (factory, shared),
            Lookup::Create(factory, shared) => {
                self.inner.tracker.add_factory(Arc::clone(&factory));
                (factory, shared)
            }
        };

        let outcome = shared.await;

        // Normally the creating task has cleaned up already. This covers a task that was
        // dropped before it could publish.
        let factory = Arc::downgrade(&factory);
        self.inner.entries.remove_if(&key, |_, entry| entry.is_pending_for(&factory));

        outcome
    }

    /// Prepares the creation of the value for `key`.
    ///
    /// Once the outcome is known, the creating task drops the pending entry it left under
    /// `key`, whether or not any caller is still waiting. On success the observer has
    /// usually replaced it with the node already; a failure or a value that maps to another
    /// key leaves it behind.
    fn start_creation(&self, key: K, pending: PendingValue<V>) -> Arc<NodeValueFactory<V>> {
        let factory = Arc::new(NodeValueFactory::new(pending));
        let index = Arc::downgrade(&self.inner);
        let created = Arc::downgrade(&factory);

        factory.on_completion(move || {
            if let Some(index) = index.upgrade() {
                index.entries.remove_if(&key, |_, entry| entry.is_pending_for(&created));
            }
        });

        factory
    }

    /// Returns the value for `key` if it is already in the cache.
    ///
    /// Values that are still being created are not waited for.
    #[must_use]
    pub fn try_get(&self, key: &K) -> Option<V> {
        let node = self.resident(key)?;
        Some(self.hit(&node))
    }

    /// Returns the value for `key`, waiting for it if it is being created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the key is not mapped, or the creation error if the
    /// value being waited for failed.
    pub async fn get_existing(&self, key: &K) -> Result<V> {
        let lookup = match self.inner.entries.get(key).as_deref() {
            Some(IndexEntry::Node(node)) if node.is_valid() => Lookup::Hit(Arc::clone(node)),
            Some(IndexEntry::Pending(existing)) => Lookup::Join(Arc::clone(existing), existing.value()),
            Some(IndexEntry::Node(_)) | None => return Err(Error::KeyNotFound),
        };

        match lookup {
            Lookup::Hit(node) => Ok(self.hit(&node)),
            Lookup::Join(_, shared) | Lookup::Create(_, shared) => shared.await,
        }
    }

    /// Removes the value for `key` from the cache.
    ///
    /// The value stops being served at once. Observers are told and the value is disposed in
    /// the background. Returns the removed value, if the key was mapped to one.
    ///
    /// A key whose value is still being created is left alone and `None` is returned; lookups
    /// keep joining that creation instead of starting another one.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (_, entry) = self
            .inner
            .entries
            .remove_if(key, |_, entry| matches!(entry, IndexEntry::Node(_)))?;
        let IndexEntry::Node(node) = entry else {
            return None;
        };

        self.inner.tracker.remove(&node).then(|| node.value().clone())
    }

    fn resident(&self, key: &K) -> Option<Arc<Node<V>>> {
        match self.inner.entries.get(key).as_deref() {
            Some(IndexEntry::Node(node)) if node.is_valid() => Some(Arc::clone(node)),
            _ => None,
        }
    }

    fn hit(&self, node: &Arc<Node<V>>) -> V {
        self.inner.tracker.hit();
        self.inner.tracker.touch(node);
        node.value().clone()
    }
}

impl<K: Eq + Hash, V> Debug for Index<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.inner.name)
            .field("len", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}

/// Keeps an index's mapping in line with the cache.
struct IndexObserver<K, V> {
    index: Weak<IndexInner<K, V>>,
}

impl<K, V> CacheValueObserver<V> for IndexObserver<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn value_added(&self, node: &Arc<Node<V>>, value: &V) {
        if let Some(index) = self.index.upgrade() {
            let key = (index.key_provider)(value);
            index.entries.insert(key, IndexEntry::Node(Arc::clone(node)));
        }
    }

    fn value_removed(&self, node: &Arc<Node<V>>, value: &V) {
        if let Some(index) = self.index.upgrade() {
            let key = (index.key_provider)(value);
            index.entries.remove_if(&key, |_, entry| entry.is_node(node));
        }
    }

    fn cache_cleared(&self) {
        if let Some(index) = self.index.upgrade() {
            index.entries.retain(|_, entry| matches!(entry, IndexEntry::Pending(_)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::dispose::Disposer;
    use crate::{CacheSettings, ClockControl, Spawner};

    fn index() -> Index<u32, (u32, &'static str)> {
        let control = ClockControl::new();
        let settings = CacheSettings {
            capacity: 100,
            window_count: 10,
            min_age: Duration::from_secs(1),
            max_age: Duration::from_secs(60),
        };
        let tracker = NodeTracker::new(&settings, control.to_clock(), Spawner::new_tokio(), Disposer::None);
        Index::new("id".to_string(), tracker, |(id, _): &(u32, &'static str)| *id)
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let index = index();

        let created = index
            .get(1, |id| async move { Ok::<_, BoxError>((id, "one")) })
            .await
            .expect("created");
        let cached = index
            .get(1, |_| async { Err::<(u32, &str), _>("not called") })
            .await
            .expect("cached");

        assert_eq!(created, (1, "one"));
        assert_eq!(cached, (1, "one"));
        assert_eq!(index.len(), 1);

        let stats = index.inner.tracker.statistics();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn values_from_other_paths_are_mapped() {
        let index = index();

        index.inner.tracker.add_value((5, "five"));

        assert_eq!(index.try_get(&5), Some((5, "five")));
        assert_eq!(index.try_get(&6), None);
    }

    #[tokio::test]
    async fn failures_leave_no_entry() {
        let index = index();

        let outcome = index.get(2, |_| async { Err::<(u32, &str), _>("boom") }).await;

        assert!(matches!(outcome, Err(Error::CreateFaulted(_))));
        assert!(index.is_empty());
        assert!(matches!(index.get_existing(&2).await, Err(Error::KeyNotFound)));
    }

    #[tokio::test]
    async fn get_existing_waits_for_pending_values() {
        let index = index();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let creating = index.get(8, |id| async move {
            let _ = gate.await;
            Ok::<_, BoxError>((id, "eight"))
        });
        let waiting = async {
            tokio::task::yield_now().await;
            index.get_existing(&8).await
        };
        let releasing = async {
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            let _ = release.send(());
        };

        let (created, existing, ()) = tokio::join!(creating, waiting, releasing);

        assert_eq!(created.expect("created"), (8, "eight"));
        assert_eq!(existing.expect("shared"), (8, "eight"));
    }

    #[tokio::test]
    async fn mismatched_keys_do_not_leave_pending_entries() {
        let index = index();

        let value = index
            .get(3, |_| async { Ok::<_, BoxError>((30, "thirty")) })
            .await
            .expect("created");

        assert_eq!(value, (30, "thirty"));
        assert_eq!(index.try_get(&3), None);
        assert_eq!(index.try_get(&30), Some((30, "thirty")));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn remove_unmaps_and_invalidates() {
        let index = index();
        index
            .get(4, |id| async move { Ok::<_, BoxError>((id, "four")) })
            .await
            .expect("created");

        assert_eq!(index.remove(&4), Some((4, "four")));
        assert_eq!(index.remove(&4), None);
        assert_eq!(index.try_get(&4), None);
        assert_eq!(index.inner.tracker.statistics().count, 0);
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn abandoned_failing_lookup_is_not_replayed() {
        let index = index();

        let dropped = index.get(1, |_| async { Err::<(u32, &str), _>("boom") });
        assert!(dropped.now_or_never().is_none());
        settle().await;

        assert!(index.is_empty());
        for _ in 0..3 {
            let value = index.get(1, |id| async move { Ok::<_, BoxError>((id, "one")) }).await;
            assert_eq!(value.expect("created afresh"), (1, "one"));
        }
        assert_eq!(index.inner.tracker.statistics().create_faults, 1);
    }

    #[tokio::test]
    async fn abandoned_lookup_under_another_key_leaves_no_entry() {
        let index = index();

        let dropped = index.get(3, |_| async { Ok::<_, BoxError>((30, "thirty")) });
        assert!(dropped.now_or_never().is_none());
        settle().await;

        assert_eq!(index.len(), 1);
        assert_eq!(index.try_get(&30), Some((30, "thirty")));
        assert!(matches!(index.get_existing(&3).await, Err(Error::KeyNotFound)));
    }

    #[tokio::test]
    async fn remove_leaves_values_being_created_alone() {
        let index = index();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        let counted = Arc::clone(&calls);
        let creating = index.get(8, move |id| async move {
            counted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let _ = gate.await;
            Ok::<_, BoxError>((id, "eight"))
        });
        let removing = async {
            tokio::task::yield_now().await;
            let removed = index.remove(&8);
            let len = index.len();
            let joined = index.get(8, |_| async { Err::<(u32, &str), _>("not called") });
            let _ = release.send(());
            (removed, len, joined.await)
        };

        let (created, (removed, len, joined)) = tokio::join!(creating, removing);

        assert_eq!(removed, None);
        assert_eq!(len, 1);
        assert_eq!(created.expect("created"), (8, "eight"));
        assert_eq!(joined.expect("joined"), (8, "eight"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(index.inner.tracker.statistics().count, 1);
    }

    #[tokio::test]
    async fn clear_drops_mappings() {
        let index = index();
        index.inner.tracker.add_value((1, "one"));
        index.inner.tracker.add_value((2, "two"));

        index.inner.tracker.clear();

        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn debug_names_the_index() {
        let index = index();
        assert_eq!(index.name(), "id");
        assert!(format!("{index:?}").contains("\"id\""));
    }
}
