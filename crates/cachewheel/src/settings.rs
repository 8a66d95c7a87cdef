// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::{Error, Result};

/// The longest a value may live in the cache, and how often the whole ring is rebuilt.
pub(crate) const MAX_AGE_UPPER_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Number of buckets each window is sliced into.
pub(crate) const SLICES_PER_WINDOW: usize = 240;

/// Spare buckets kept between the oldest and the current bucket.
pub(crate) const RING_SLACK: usize = 5;

/// How many validity checks fit into one max age.
const CHECKS_PER_MAX_AGE: u32 = 240;

/// Sizing and lifetime settings for a cache.
///
/// The cache never holds values for longer than [`max_age`](Self::max_age), and once it holds
/// more than [`capacity`](Self::capacity) values it starts evicting the oldest buckets whose
/// values are at least [`min_age`](Self::min_age) old.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use cachewheel::CacheSettings;
///
/// let settings = CacheSettings {
///     capacity: 500,
///     max_age: Duration::from_secs(300),
///     ..CacheSettings::default()
/// };
///
/// assert_eq!(settings.window_count, 60);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheSettings {
    /// The number of values the cache aims to hold.
    pub capacity: usize,

    /// How many windows the capacity is spread over. Each bucket holds roughly
    /// `capacity / window_count` values before the cache rotates to a new one.
    pub window_count: usize,

    /// Values younger than this are never evicted for capacity reasons alone.
    pub min_age: Duration,

    /// Values older than this are evicted on the next cleanup pass. Clamped to 24 hours.
    pub max_age: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            window_count: 60,
            min_age: Duration::from_secs(60),
            max_age: MAX_AGE_UPPER_LIMIT,
        }
    }
}

impl CacheSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidSettings("capacity must be at least 1"));
        }

        if self.window_count == 0 {
            return Err(Error::InvalidSettings("window count must be at least 1"));
        }

        if self.max_age.is_zero() {
            return Err(Error::InvalidSettings("max age must be greater than zero"));
        }

        if self.min_age > self.max_age {
            return Err(Error::InvalidSettings("min age must not exceed max age"));
        }

        Ok(())
    }

    /// The effective max age, never above 24 hours.
    pub(crate) fn effective_max_age(&self) -> Duration {
        self.max_age.min(MAX_AGE_UPPER_LIMIT)
    }

    /// The effective min age, never above the effective max age.
    pub(crate) fn effective_min_age(&self) -> Duration {
        self.min_age.min(self.effective_max_age())
    }

    pub(crate) fn bucket_count(&self) -> usize {
        SLICES_PER_WINDOW
            .saturating_mul(self.window_count)
            .saturating_add(RING_SLACK)
    }

    pub(crate) fn bucket_size(&self) -> usize {
        (self.capacity / self.window_count).max(1)
    }

    pub(crate) fn validity_check_interval(&self) -> Duration {
        self.effective_max_age() / CHECKS_PER_MAX_AGE
    }
}
