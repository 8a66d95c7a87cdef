// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Owns the bucket ring and drives rotation, cleanup and resets.
//!
//! All structural changes to the ring happen under one mutex. Inserting, rotating and
//! resetting take it unconditionally; the maintenance check that runs after a removal only
//! tries to take it and skips the check if the lock is busy. At most one cleanup pass is in
//! flight at a time, guarded by an atomic flag rather than by the lock. Observers are always
//! notified, and values always disposed, after the lock has been released.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bucket::{BucketRing, Disposition};
use crate::dispose::Disposer;
use crate::observer::{CacheValueObserver, ConnectHandle, ObserverSet};
use crate::pending::NodeValueFactory;
use crate::settings::{CacheSettings, MAX_AGE_UPPER_LIMIT, RING_SLACK};
use crate::statistics::{CacheStatistics, StatisticsSnapshot};
use crate::telemetry::{CacheActivity, emit};
use crate::{Clock, Node, Spawner};

/// Past this bucket sequence number the ring is rebuilt from scratch.
const MAX_BUCKET_INDEX: u64 = 1_000_000_000;

/// Maintenance decided while holding the lock and carried out after releasing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Maintenance {
    None,
    Reset,
    Cleanup,
}

struct RingState<V> {
    ring: BucketRing<V>,
    oldest: u64,
    current: u64,
    next_validity_check: Instant,
    cache_reset_time: Instant,
    generation: u64,
}

impl<V> RingState<V> {
    fn new(bucket_count: usize, now: Instant, generation: u64) -> Self {
        Self {
            ring: BucketRing::new(bucket_count),
            oldest: 0,
            current: 0,
            next_validity_check: now,
            cache_reset_time: now.checked_add(MAX_AGE_UPPER_LIMIT).unwrap_or(now),
            generation,
        }
    }

    fn open_bucket(&mut self, seq: u64, now: Instant, validity_check_interval: Duration) {
        let previous = self.current;
        self.ring.bucket_mut(previous).stop(now);

        self.current = seq;
        self.ring.bucket_mut(seq).start(now);
        self.next_validity_check = now.checked_add(validity_check_interval).unwrap_or(now);
    }

    fn is_reset_due(&self, now: Instant) -> bool {
        self.current > MAX_BUCKET_INDEX || now >= self.cache_reset_time
    }

    fn are_low_on_buckets(&self, max_backlog: u64) -> bool {
        self.current - self.oldest > max_backlog
    }
}

struct TrackerInner<V> {
    bucket_count: usize,
    bucket_size: usize,
    max_backlog: u64,
    min_age: Duration,
    max_age: Duration,
    validity_check_interval: Duration,
    clock: Clock,
    spawner: Spawner,
    disposer: Disposer<V>,
    statistics: CacheStatistics,
    observers: ObserverSet<V>,
    state: Mutex<RingState<V>>,
    current: AtomicU64,
    cleanup_scheduled: AtomicBool,
}

/// Tracks every node of one cache in time buckets.
pub(crate) struct NodeTracker<V> {
    inner: Arc<TrackerInner<V>>,
}

impl<V> Clone for NodeTracker<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> NodeTracker<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(settings: &CacheSettings, clock: Clock, spawner: Spawner, disposer: Disposer<V>) -> Self {
        let now = clock.now();
        let bucket_count = settings.bucket_count();
        let validity_check_interval = settings.validity_check_interval();

        let mut state = RingState::new(bucket_count, now, 0);
        state.open_bucket(0, now, validity_check_interval);

        Self {
            inner: Arc::new(TrackerInner {
                bucket_count,
                bucket_size: settings.bucket_size(),
                max_backlog: u64::try_from(bucket_count - RING_SLACK).unwrap_or(u64::MAX),
                min_age: settings.effective_min_age(),
                max_age: settings.effective_max_age(),
                validity_check_interval,
                clock,
                spawner,
                disposer,
                statistics: CacheStatistics::new(settings),
                observers: ObserverSet::new(),
                state: Mutex::new(state),
                current: AtomicU64::new(0),
                cleanup_scheduled: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn statistics(&self) -> StatisticsSnapshot {
        self.inner.statistics.snapshot()
    }

    pub(crate) fn hit(&self) {
        self.inner.statistics.hit();
    }

    pub(crate) fn connect(&self, observer: Arc<dyn CacheValueObserver<V>>) -> ConnectHandle {
        self.inner.observers.connect(observer)
    }

    /// Creates the value behind `factory` in the background and inserts it.
    pub(crate) fn add_factory(&self, factory: Arc<NodeValueFactory<V>>) {
        let tracker = self.clone();
        self.inner.spawner.spawn(async move {
            tracker.add_node(&factory).await;
        });
    }

    async fn add_node(&self, factory: &NodeValueFactory<V>) {
        match factory.create_value().await {
            Ok(value) => {
                self.inner.statistics.miss();
                self.add_value(value.clone());
                factory.publish(Ok(value));
            }
            Err(error) => {
                self.inner.statistics.create_faulted();
                emit!(CacheActivity::CreateFaulted, error = %error, "value creation failed");
                factory.publish(Err(error));
            }
        }
    }

    /// Inserts a ready value into the current bucket.
    pub(crate) fn add_value(&self, value: V) -> Arc<Node<V>> {
        let inner = &*self.inner;
        let node = Arc::new(Node::new(value));
        let now = inner.clock.now();

        let (cleared, maintenance) = {
            let mut state = inner.state.lock();

            let cleared = state.is_reset_due(now);
            if cleared {
                self.reset(&mut state, now);
            }

            let current = state.current;
            state.ring.push(current, Arc::clone(&node));
            inner.statistics.value_added();

            (cleared, self.maintenance(&state, now))
        };

        if cleared {
            self.notify_cleared();
        }

        emit!(CacheActivity::Added, bucket = node.bucket(), "value added");
        inner.observers.value_added(&node);

        self.run_maintenance(maintenance, now);
        node
    }

    /// Marks `node` invalid and finishes its removal in the background.
    ///
    /// Returns `false` if the node had already left the cache.
    pub(crate) fn remove(&self, node: &Arc<Node<V>>) -> bool {
        if !node.evict() {
            return false;
        }

        self.inner.statistics.value_removed();

        let tracker = self.clone();
        let node = Arc::clone(node);
        self.inner.spawner.spawn(async move {
            tracker.check_cache_status();
            emit!(CacheActivity::Removed, "value removed");
            tracker.inner.observers.value_removed(&node);
            tracker.inner.disposer.dispose(node.value()).await;
        });

        true
    }

    /// Moves a node that is read after its bucket closed into the current bucket.
    ///
    /// Only the node's bucket handle changes; the node is relinked when its old bucket is
    /// swept.
    pub(crate) fn touch(&self, node: &Node<V>) {
        if node.bucket() == self.inner.current.load(Ordering::Acquire) {
            return;
        }

        let state = self.inner.state.lock();
        if node.is_valid() && node.bucket() != state.current {
            node.assign(state.current);
        }
    }

    /// Drops every node and starts over with a fresh ring.
    pub(crate) fn clear(&self) {
        let now = self.inner.clock.now();
        {
            let mut state = self.inner.state.lock();
            self.reset(&mut state, now);
        }

        self.notify_cleared();
    }

    /// Iterates the values in the cache from the newest bucket to the oldest.
    pub(crate) fn snapshot(&self) -> Snapshot<V> {
        let state = self.inner.state.lock();

        Snapshot {
            tracker: self.clone(),
            generation: state.generation,
            cursor: Some(state.current),
            buffered: Vec::new().into_iter(),
        }
    }

    /// Checks whether maintenance is due without waiting for the lock.
    fn check_cache_status(&self) {
        let now = self.inner.clock.now();
        let maintenance = {
            let Some(state) = self.inner.state.try_lock() else {
                return;
            };
            self.maintenance(&state, now)
        };

        self.run_maintenance(maintenance, now);
    }

    /// Decides what maintenance is due. Claims the cleanup flag when it picks a cleanup.
    fn maintenance(&self, state: &RingState<V>, now: Instant) -> Maintenance {
        let inner = &*self.inner;
        let cleanup_required = state.ring.bucket(state.current).count() > inner.bucket_size || now > state.next_validity_check;

        if !cleanup_required || inner.cleanup_scheduled.load(Ordering::Acquire) {
            Maintenance::None
        } else if state.is_reset_due(now) {
            Maintenance::Reset
        } else if inner
            .cleanup_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Maintenance::Cleanup
        } else {
            Maintenance::None
        }
    }

    fn run_maintenance(&self, maintenance: Maintenance, now: Instant) {
        match maintenance {
            Maintenance::None => {}
            Maintenance::Reset => self.clear(),
            Maintenance::Cleanup => {
                let tracker = self.clone();
                self.inner.spawner.spawn(async move {
                    tracker.cleanup(now).await;
                });
            }
        }
    }

    async fn cleanup(&self, now: Instant) {
        let evicted = self.sweep(now);
        self.inner.cleanup_scheduled.store(false, Ordering::Release);

        for node in evicted {
            emit!(CacheActivity::Evicted, "value evicted");
            self.inner.observers.value_removed(&node);
            self.inner.disposer.dispose(node.value()).await;
        }
    }

    /// Evicts cold nodes from the oldest buckets and rotates to a new current bucket.
    fn sweep(&self, now: Instant) -> Vec<Arc<Node<V>>> {
        let inner = &*self.inner;
        let mut evicted = Vec::new();
        let mut state = inner.state.lock();

        let mut items_above_capacity = inner.statistics.count().saturating_sub(inner.statistics.capacity());
        let expiration = now.checked_sub(inner.max_age);
        let aged = now.checked_sub(inner.min_age);
        let mut newest_swept = None;

        while state.oldest < state.current {
            let bucket = state.ring.bucket(state.oldest);
            let due = state.are_low_on_buckets(inner.max_backlog)
                || expiration.is_some_and(|threshold| bucket.has_expired(threshold))
                || (items_above_capacity > 0 && aged.is_some_and(|threshold| bucket.is_old_enough(threshold)));

            if !due {
                break;
            }
            newest_swept = Some((bucket.started(), bucket.stopped()));

            let oldest = state.oldest;
            let current = state.current;
            state.ring.sweep(oldest, |node| {
                if !node.is_valid() {
                    return Disposition::Release;
                }

                match node.bucket() {
                    assigned if assigned == oldest => {
                        if node.evict() {
                            inner.statistics.value_removed();
                            items_above_capacity = items_above_capacity.saturating_sub(1);
                            evicted.push(Arc::clone(node));
                        }
                        Disposition::Release
                    }
                    assigned if assigned > oldest && assigned <= current => Disposition::Keep(assigned),
                    // A valid node pointing outside the live buckets has nowhere to go.
                    _ => Disposition::Release,
                }
            });

            state.oldest += 1;
        }

        let next = state.current + 1;
        state.open_bucket(next, inner.clock.now(), inner.validity_check_interval);
        inner.current.store(next, Ordering::Release);
        inner.statistics.set_bucket_indices(state.oldest, state.current);

        // Age and width of the youngest bucket this pass swept, if any.
        let swept_age = newest_swept
            .and_then(|(_, stopped)| stopped)
            .map(|stopped| now.saturating_duration_since(stopped));
        let swept_window = newest_swept.and_then(|(started, stopped)| Some(stopped?.saturating_duration_since(started?)));

        emit!(
            CacheActivity::Cleanup,
            evicted = evicted.len(),
            swept_age = ?swept_age,
            swept_window = ?swept_window,
            oldest_bucket = state.oldest,
            current_bucket = state.current,
            resident = inner.statistics.count(),
            "cleanup pass finished"
        );

        evicted
    }

    fn reset(&self, state: &mut RingState<V>, now: Instant) {
        let inner = &*self.inner;

        state.ring.invalidate_all();
        *state = RingState::new(inner.bucket_count, now, state.generation.wrapping_add(1));
        state.open_bucket(0, now, inner.validity_check_interval);

        inner.current.store(0, Ordering::Release);
        inner.statistics.reset();
        inner.statistics.set_bucket_indices(0, 0);

        emit!(CacheActivity::Reset, generation = state.generation, "bucket ring rebuilt");
    }

    fn notify_cleared(&self) {
        emit!(CacheActivity::Cleared, "cache cleared");
        self.inner.observers.cache_cleared();
    }
}

impl<V> Debug for NodeTracker<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTracker")
            .field("capacity", &self.inner.statistics.capacity())
            .field("bucket_count", &self.inner.bucket_count)
            .field("bucket_size", &self.inner.bucket_size)
            .field("current", &self.inner.current.load(Ordering::Relaxed))
            .field("cleanup_scheduled", &self.inner.cleanup_scheduled.load(Ordering::Relaxed))
            .field("observers", &self.inner.observers)
            .finish_non_exhaustive()
    }
}

/// A weakly consistent iterator over the values in a cache.
///
/// Buckets are visited from the newest to the oldest and each bucket is read under a brief
/// lock, so the snapshot never blocks maintenance for long. Values added, moved or evicted
/// while the iteration is in progress may or may not be seen. Iteration stops if the cache
/// is cleared.
///
/// Created by [`Cache::get_all`](crate::Cache::get_all).
pub struct Snapshot<V> {
    tracker: NodeTracker<V>,
    generation: u64,
    cursor: Option<u64>,
    buffered: std::vec::IntoIter<Arc<Node<V>>>,
}

impl<V> Iterator for Snapshot<V>
where
    V: Clone + Send + Sync + 'static,
{
    type Item = V;

    fn next(&mut self) -> Option<V> {
        loop {
            if let Some(node) = self.buffered.next() {
                if node.is_valid() {
                    return Some(node.value().clone());
                }
                continue;
            }

            let seq = self.cursor?;
            let state = self.tracker.inner.state.lock();

            if state.generation != self.generation || seq < state.oldest {
                self.cursor = None;
                return None;
            }

            self.buffered = state.ring.valid_nodes(seq).into_iter();
            self.cursor = seq.checked_sub(1);
        }
    }
}

impl<V> Debug for Snapshot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("cursor", &self.cursor)
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}
