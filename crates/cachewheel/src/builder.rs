// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::dispose::Disposer;
use crate::tracker::NodeTracker;
use crate::{AsyncDispose, Cache, CacheSettings, Clock, Dispose, Result, Spawner};

/// Builder for a [`Cache`].
///
/// Settings left alone keep the values of [`CacheSettings::default`]. Without an explicit
/// [`spawner`](Self::spawner), background work runs on the Tokio runtime that is current when
/// [`build`](Self::build) is called.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachewheel::{Cache, Spawner};
///
/// let cache = Cache::<String>::builder()
///     .capacity(500)
///     .window_count(10)
///     .min_age(Duration::from_secs(5))
///     .max_age(Duration::from_secs(600))
///     .spawner(Spawner::new_custom(|work| {
///         std::thread::spawn(move || futures::executor::block_on(work));
///     }))
///     .build()
///     .unwrap();
///
/// assert_eq!(cache.statistics().bucket_count, 2_405);
/// ```
#[derive(Debug)]
pub struct CacheBuilder<V> {
    settings: CacheSettings,
    clock: Option<Clock>,
    spawner: Option<Spawner>,
    disposer: Disposer<V>,
}

impl<V> Default for CacheBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheBuilder<V> {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: CacheSettings::default(),
            clock: None,
            spawner: None,
            disposer: Disposer::None,
        }
    }

    /// Replaces every setting at once.
    #[must_use]
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the number of values the cache aims to hold.
    ///
    /// The limit is approximate: values are evicted a bucket at a time and never before they
    /// reach the min age.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.settings.capacity = capacity;
        self
    }

    /// Sets how many buckets' worth of values the capacity is split into.
    ///
    /// More windows give finer-grained eviction at the price of more frequent cleanup passes.
    #[must_use]
    pub fn window_count(mut self, window_count: usize) -> Self {
        self.settings.window_count = window_count;
        self
    }

    /// Sets the age below which values are never evicted to make room.
    #[must_use]
    pub fn min_age(mut self, min_age: Duration) -> Self {
        self.settings.min_age = min_age;
        self
    }

    /// Sets the age after which values that were not read are evicted.
    ///
    /// Values above 24 hours are treated as 24 hours.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.settings.max_age = max_age;
        self
    }

    /// Sets the clock used for bucket rotation and aging.
    ///
    /// Tests pass [`ClockControl::to_clock`](crate::ClockControl::to_clock) to move time by hand.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets where cleanup passes, removals and value creation run.
    #[must_use]
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }
}

impl<V: 'static> CacheBuilder<V> {
    /// Calls [`Dispose::dispose`] on every value that is evicted or removed.
    #[must_use]
    pub fn disposable(mut self) -> Self
    where
        V: Dispose,
    {
        self.disposer = Disposer::sync();
        self
    }

    /// Awaits [`AsyncDispose::dispose_async`] for every value that is evicted or removed.
    #[must_use]
    pub fn async_disposable(mut self) -> Self
    where
        V: AsyncDispose,
    {
        self.disposer = Disposer::asynchronous();
        self
    }
}

impl<V> CacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Validates the settings and creates the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`](crate::Error::InvalidSettings) if a setting is out of
    /// range, and [`Error::NoRuntime`](crate::Error::NoRuntime) if no spawner was given and no
    /// Tokio runtime is current.
    pub fn build(self) -> Result<Cache<V>> {
        self.settings.validate()?;

        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Spawner::try_new_tokio()?,
        };
        let clock = self.clock.unwrap_or_else(Clock::system);

        let tracker = NodeTracker::new(&self.settings, clock, spawner, self.disposer);
        Ok(Cache::from_tracker(tracker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClockControl, Error};

    fn inline() -> Spawner {
        Spawner::new_custom(futures::executor::block_on)
    }

    #[test]
    fn defaults_shape_the_ring() {
        let cache = CacheBuilder::<u32>::new().spawner(inline()).build().expect("defaults are valid");
        let statistics = cache.statistics();

        assert_eq!(statistics.capacity, 10_000);
        assert_eq!(statistics.bucket_count, 240 * 60 + 5);
        assert_eq!(statistics.bucket_size, 166);
        assert_eq!(statistics.max_age, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn setters_override_individual_settings() {
        let cache = CacheBuilder::<u32>::new()
            .settings(CacheSettings {
                capacity: 1,
                ..CacheSettings::default()
            })
            .capacity(40)
            .window_count(4)
            .min_age(Duration::from_secs(2))
            .max_age(Duration::from_secs(48 * 60 * 60))
            .clock(ClockControl::new().to_clock())
            .spawner(inline())
            .build()
            .expect("valid settings");
        let statistics = cache.statistics();

        assert_eq!(statistics.capacity, 40);
        assert_eq!(statistics.bucket_count, 965);
        assert_eq!(statistics.bucket_size, 10);
        assert_eq!(statistics.min_age, Duration::from_secs(2));
        assert_eq!(statistics.max_age, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let result = CacheBuilder::<u32>::new().capacity(0).spawner(inline()).build();

        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn building_without_a_runtime_needs_a_spawner() {
        let result = CacheBuilder::<u32>::new().build();

        assert!(matches!(result, Err(Error::NoRuntime)));
    }

    #[tokio::test]
    async fn the_current_runtime_is_used_by_default() {
        let cache = CacheBuilder::<u32>::new().build().expect("runtime is current");

        cache.add(1);
        assert_eq!(cache.statistics().count, 1);
    }
}
