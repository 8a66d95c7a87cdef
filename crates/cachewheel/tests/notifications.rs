// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for observers and value disposal.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cachewheel::{AsyncDispose, BoxError, Cache, CacheValueObserver, ClockControl, Dispose, Node};
use futures::FutureExt;
use futures::future::BoxFuture;

#[derive(Debug, Default)]
struct Counts {
    added: AtomicUsize,
    removed: AtomicUsize,
    cleared: AtomicUsize,
}

impl CacheValueObserver<u32> for Counts {
    fn value_added(&self, _node: &Arc<Node<u32>>, _value: &u32) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn value_removed(&self, _node: &Arc<Node<u32>>, _value: &u32) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }

    fn cache_cleared(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

fn snapshot(counts: &Counts) -> (usize, usize, usize) {
    (
        counts.added.load(Ordering::SeqCst),
        counts.removed.load(Ordering::SeqCst),
        counts.cleared.load(Ordering::SeqCst),
    )
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn observers_see_adds_removals_and_clears() {
    let cache = Cache::<u32>::builder().build().unwrap();
    let counts = Arc::new(Counts::default());
    let _connection = cache.connect(Arc::clone(&counts) as _);

    let first = cache.add(1);
    cache.add(2);
    assert!(cache.remove(&first));
    assert!(!cache.remove(&first));
    settle().await;
    cache.clear();

    assert_eq!(snapshot(&counts), (2, 1, 1));
}

#[tokio::test]
async fn disconnected_observers_hear_nothing() {
    let cache = Cache::<u32>::builder().build().unwrap();
    let counts = Arc::new(Counts::default());
    let connection = cache.connect(Arc::clone(&counts) as _);

    cache.add(1);
    connection.disconnect();
    cache.add(2);
    cache.clear();

    assert_eq!(snapshot(&counts), (1, 0, 0));
}

#[tokio::test]
async fn every_observer_is_notified() {
    let cache = Cache::<u32>::builder().build().unwrap();
    let first = Arc::new(Counts::default());
    let second = Arc::new(Counts::default());
    let _first = cache.connect(Arc::clone(&first) as _);
    let _second = cache.connect(Arc::clone(&second) as _);

    cache.add(1);

    assert_eq!(snapshot(&first), (1, 0, 0));
    assert_eq!(snapshot(&second), (1, 0, 0));
}

#[derive(Clone, Debug)]
struct Handle {
    id: u32,
    released: Arc<AtomicUsize>,
}

impl Dispose for Handle {
    fn dispose(&self) -> Result<(), BoxError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        if self.id == 0 {
            Err("handle 0 is stuck".into())
        } else {
            Ok(())
        }
    }
}

impl AsyncDispose for Handle {
    fn dispose_async(&self) -> BoxFuture<'static, Result<(), BoxError>> {
        let released = Arc::clone(&self.released);
        async move {
            tokio::task::yield_now().await;
            released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}

fn handle(id: u32, released: &Arc<AtomicUsize>) -> Handle {
    Handle {
        id,
        released: Arc::clone(released),
    }
}

#[tokio::test]
async fn removed_values_are_disposed() {
    let released = Arc::new(AtomicUsize::new(0));
    let cache = Cache::<Handle>::builder().disposable().build().unwrap();

    let node = cache.add(handle(1, &released));
    assert!(cache.remove(&node));
    settle().await;

    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disposal_failures_do_not_disturb_the_cache() {
    let released = Arc::new(AtomicUsize::new(0));
    let cache = Cache::<Handle>::builder().disposable().build().unwrap();

    let stuck = cache.add(handle(0, &released));
    cache.add(handle(1, &released));
    assert!(cache.remove(&stuck));
    settle().await;

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(cache.statistics().count, 1);
    assert_eq!(cache.get_all().map(|handle| handle.id).collect::<Vec<_>>(), vec![1]);
}

#[tokio::test]
async fn evicted_values_are_disposed_asynchronously() {
    let control = ClockControl::new();
    let released = Arc::new(AtomicUsize::new(0));
    let cache = Cache::<Handle>::builder()
        .capacity(100)
        .window_count(1)
        .min_age(Duration::from_secs(1))
        .max_age(Duration::from_secs(10))
        .clock(control.to_clock())
        .async_disposable()
        .build()
        .unwrap();

    cache.add(handle(1, &released));
    cache.add(handle(2, &released));
    settle().await;

    control.advance(Duration::from_secs(5));
    cache.add(handle(3, &released));
    settle().await;

    control.advance(Duration::from_secs(6));
    cache.add(handle(4, &released));
    settle().await;

    // The value added when the first bucket closed shares its fate.
    assert_eq!(released.load(Ordering::SeqCst), 3);
    assert_eq!(cache.get_all().map(|handle| handle.id).collect::<Vec<_>>(), vec![4]);
}

#[tokio::test]
async fn clear_does_not_dispose() {
    let released = Arc::new(AtomicUsize::new(0));
    let cache = Cache::<Handle>::builder().disposable().build().unwrap();

    cache.add(handle(1, &released));
    cache.clear();
    settle().await;

    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert_eq!(cache.statistics().count, 0);
}
