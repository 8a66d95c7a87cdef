// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::settings::CacheSettings;

/// Live counters for a cache. Only the tracker writes them.
#[derive(Debug)]
pub(crate) struct CacheStatistics {
    capacity: usize,
    bucket_count: usize,
    bucket_size: usize,
    min_age: Duration,
    max_age: Duration,
    validity_check_interval: Duration,
    count: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    create_faults: AtomicU64,
    oldest_bucket_index: AtomicU64,
    current_bucket_index: AtomicU64,
}

impl CacheStatistics {
    pub(crate) fn new(settings: &CacheSettings) -> Self {
        Self {
            capacity: settings.capacity,
            bucket_count: settings.bucket_count(),
            bucket_size: settings.bucket_size(),
            min_age: settings.effective_min_age(),
            max_age: settings.effective_max_age(),
            validity_check_interval: settings.validity_check_interval(),
            count: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            create_faults: AtomicU64::new(0),
            oldest_bucket_index: AtomicU64::new(0),
            current_bucket_index: AtomicU64::new(0),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn value_added(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn value_removed(&self) {
        // A removal racing a reset must not wrap the counter.
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    }

    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn create_faulted(&self) {
        self.create_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_bucket_indices(&self, oldest: u64, current: u64) {
        self.oldest_bucket_index.store(oldest, Ordering::Relaxed);
        self.current_bucket_index.store(current, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.count.store(0, Ordering::Release);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.create_faults.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            capacity: self.capacity,
            bucket_count: self.bucket_count,
            bucket_size: self.bucket_size,
            min_age: self.min_age,
            max_age: self.max_age,
            validity_check_interval: self.validity_check_interval,
            count: self.count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            create_faults: self.create_faults.load(Ordering::Relaxed),
            oldest_bucket_index: self.oldest_bucket_index.load(Ordering::Relaxed),
            current_bucket_index: self.current_bucket_index.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a cache's statistics.
///
/// Each field is read independently, so a snapshot taken while the cache is busy may mix
/// values from slightly different moments.
///
/// # Examples
///
/// ```
/// use cachewheel::{Cache, Spawner};
///
/// let cache = Cache::<u32>::builder()
///     .capacity(100)
///     .spawner(Spawner::new_custom(|fut| futures::executor::block_on(fut)))
///     .build()
///     .unwrap();
///
/// cache.add(7);
///
/// let stats = cache.statistics();
/// assert_eq!(stats.count, 1);
/// assert_eq!(stats.capacity, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct StatisticsSnapshot {
    /// The configured capacity.
    pub capacity: usize,
    /// The number of buckets in the ring.
    pub bucket_count: usize,
    /// How many values a bucket takes before a cleanup pass is scheduled.
    pub bucket_size: usize,
    /// The effective minimum age.
    pub min_age: Duration,
    /// The effective maximum age.
    pub max_age: Duration,
    /// How often the cache checks whether maintenance is due.
    pub validity_check_interval: Duration,
    /// The number of resident values.
    pub count: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Values created because a lookup missed.
    pub misses: u64,
    /// Value creations that failed.
    pub create_faults: u64,
    /// The sequence number of the oldest bucket.
    pub oldest_bucket_index: u64,
    /// The sequence number of the bucket receiving new values.
    pub current_bucket_index: u64,
}

impl Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "count {}/{}, hits {}, misses {}, faults {}, buckets {}..={} of {} (size {}), age {:?}..{:?}, check every {:?}",
            self.count,
            self.capacity,
            self.hits,
            self.misses,
            self.create_faults,
            self.oldest_bucket_index,
            self.current_bucket_index,
            self.bucket_count,
            self.bucket_size,
            self.min_age,
            self.max_age,
            self.validity_check_interval,
        )
    }
}
