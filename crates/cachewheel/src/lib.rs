// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A self-expiring, multi-indexed in-memory cache.
//!
//! Values live in a ring of time buckets. New values go into the current bucket, and the ring
//! rotates when that bucket fills up or when enough time has passed. Cleanup passes run in the
//! background and evict whole buckets once the cache is above capacity or the bucket is older
//! than the max age. Reading a value moves it into the current bucket, so values that keep
//! being used stay in the cache.
//!
//! A value can be found through any number of named [`Index`]es, each deriving its own key from
//! the value. When several callers miss on the same key at once, the value is created a single
//! time and everyone receives the same outcome.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use cachewheel::{BoxError, Cache};
//!
//! #[derive(Clone, Debug)]
//! struct User {
//!     id: u64,
//!     email: String,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), cachewheel::Error> {
//! let cache = Cache::<User>::builder()
//!     .capacity(10_000)
//!     .min_age(Duration::from_secs(10))
//!     .max_age(Duration::from_secs(15 * 60))
//!     .build()?;
//!
//! let by_id = cache.add_index("id", |user: &User| user.id)?;
//! let by_email = cache.add_index("email", |user: &User| user.email.clone())?;
//!
//! let user = by_id
//!     .get(42, |id| async move {
//!         Ok::<_, BoxError>(User { id, email: "ada@example.com".into() })
//!     })
//!     .await?;
//!
//! // The value created through one index can be found through the others.
//! let same = by_email.try_get(&user.email);
//! assert_eq!(same.map(|user| user.id), Some(42));
//! # Ok(())
//! # }
//! ```
//!
//! # Capacity and Aging
//!
//! The capacity is divided into `window_count` windows. A bucket holds up to one window's worth
//! of values and the ring holds `240 * window_count + 5` buckets, so the ring can rotate 240
//! times per window before it wraps. Eviction happens a bucket at a time, which makes the
//! capacity a target rather than a hard limit. Values younger than the min age are only evicted
//! by [`Cache::clear`], [`Cache::remove`] or [`Index::remove`].
//!
//! # Background Work
//!
//! Cleanup passes, removals and value creation run on a [`Spawner`]. By default that is the
//! Tokio runtime current when the cache is built; [`Spawner::new_custom`] accepts any other
//! executor.
//!
//! # Logging
//!
//! Cache activity is reported through [`tracing`] events carrying a `cache.activity` field, for
//! example `cachewheel.evicted` or `cachewheel.create_faulted`. Faults are logged at `WARN`,
//! clears and resets at `INFO` and routine activity at `DEBUG`.

mod bucket;
mod builder;
mod cache;
mod clock;
mod dispose;
mod error;
mod index;
mod node;
mod observer;
mod pending;
mod settings;
mod spawner;
mod statistics;
mod telemetry;
mod tracker;

pub use builder::CacheBuilder;
pub use cache::Cache;
pub use clock::{Clock, ClockControl};
pub use dispose::{AsyncDispose, Dispose};
pub use error::{BoxError, Error, Result};
pub use index::Index;
pub use node::Node;
pub use observer::{CacheValueObserver, ConnectHandle};
pub use settings::CacheSettings;
pub use spawner::Spawner;
pub use statistics::StatisticsSnapshot;
pub use tracker::Snapshot;
