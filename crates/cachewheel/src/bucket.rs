// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time buckets and the ring that holds them.
//!
//! Nodes live in a slab ([`NodeArena`]) and buckets are singly linked lists threaded through
//! slab slots. A bucket only knows its head slot, so pushing is O(1) and detaching a whole
//! bucket is O(1). Buckets are addressed by a monotonically increasing sequence number that
//! wraps onto the ring with a modulo.

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Instant;

use crate::Node;

/// Index of a slot in the node arena.
pub(crate) type Slot = usize;

/// Sentinel marking the end of a bucket list.
pub(crate) const NULL_SLOT: Slot = Slot::MAX;

struct Entry<V> {
    node: Option<Arc<Node<V>>>,
    next: Slot,
}

/// Slab of node slots with a free list for recycling.
pub(crate) struct NodeArena<V> {
    entries: Vec<Entry<V>>,
    free_head: Option<Slot>,
    len: usize,
}

impl<V> NodeArena<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn alloc(&mut self, node: Arc<Node<V>>) -> Slot {
        self.len += 1;

        if let Some(slot) = self.free_head {
            let entry = &mut self.entries[slot];
            self.free_head = (entry.next != NULL_SLOT).then_some(entry.next);
            entry.node = Some(node);
            entry.next = NULL_SLOT;
            return slot;
        }

        self.entries.push(Entry {
            node: Some(node),
            next: NULL_SLOT,
        });
        self.entries.len() - 1
    }

    fn free(&mut self, slot: Slot) {
        let entry = &mut self.entries[slot];
        if entry.node.take().is_some() {
            self.len -= 1;
        }
        entry.next = self.free_head.unwrap_or(NULL_SLOT);
        self.free_head = Some(slot);
    }

    fn node(&self, slot: Slot) -> Option<&Arc<Node<V>>> {
        self.entries.get(slot).and_then(|entry| entry.node.as_ref())
    }

    fn next(&self, slot: Slot) -> Slot {
        self.entries.get(slot).map_or(NULL_SLOT, |entry| entry.next)
    }

    fn set_next(&mut self, slot: Slot, next: Slot) {
        self.entries[slot].next = next;
    }

    fn nodes(&self) -> impl Iterator<Item = &Arc<Node<V>>> {
        self.entries.iter().filter_map(|entry| entry.node.as_ref())
    }
}

/// The nodes added during one rotation window.
#[derive(Debug, Clone)]
pub(crate) struct Bucket {
    head: Slot,
    count: usize,
    started: Option<Instant>,
    stopped: Option<Instant>,
}

impl Bucket {
    const fn empty() -> Self {
        Self {
            head: NULL_SLOT,
            count: 0,
            started: None,
            stopped: None,
        }
    }

    /// Number of nodes pushed since the bucket was last started or cleared.
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn started(&self) -> Option<Instant> {
        self.started
    }

    pub(crate) fn stopped(&self) -> Option<Instant> {
        self.stopped
    }

    pub(crate) fn start(&mut self, now: Instant) {
        self.count = 0;
        self.started = Some(now);
        self.stopped = None;
    }

    pub(crate) fn stop(&mut self, now: Instant) {
        self.stopped = Some(now);
    }

    /// `true` if the bucket started before `threshold`, the oldest start that is still fresh.
    pub(crate) fn has_expired(&self, threshold: Instant) -> bool {
        self.started.is_some_and(|started| started < threshold)
    }

    /// `true` if the bucket started before `threshold`, the newest start that may be evicted
    /// to make room.
    pub(crate) fn is_old_enough(&self, threshold: Instant) -> bool {
        self.started.is_some_and(|started| started < threshold)
    }
}

/// What the sweep of a bucket does with one of its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// The node lives on in the bucket with this sequence number.
    Keep(u64),
    /// The slot is given back to the arena.
    Release,
}

/// A fixed number of buckets over a shared node arena.
pub(crate) struct BucketRing<V> {
    arena: NodeArena<V>,
    buckets: Vec<Bucket>,
    len: u64,
}

impl<V> BucketRing<V> {
    pub(crate) fn new(bucket_count: usize) -> Self {
        let buckets = vec![Bucket::empty(); bucket_count.max(1)];
        let len = u64::try_from(buckets.len()).unwrap_or(u64::MAX);

        Self {
            arena: NodeArena::new(),
            buckets,
            len,
        }
    }

    /// Number of buckets in the ring.
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Number of nodes linked into any bucket.
    pub(crate) fn node_count(&self) -> usize {
        self.arena.len()
    }

    fn position(&self, seq: u64) -> usize {
        // The remainder is below the bucket count, so the conversion cannot fail.
        usize::try_from(seq % self.len).unwrap_or_default()
    }

    pub(crate) fn bucket(&self, seq: u64) -> &Bucket {
        &self.buckets[self.position(seq)]
    }

    pub(crate) fn bucket_mut(&mut self, seq: u64) -> &mut Bucket {
        let position = self.position(seq);
        &mut self.buckets[position]
    }

    /// Adds a node at the head of bucket `seq` and points the node at it.
    pub(crate) fn push(&mut self, seq: u64, node: Arc<Node<V>>) {
        node.assign(seq);
        let slot = self.arena.alloc(node);
        self.link(seq, slot);
    }

    fn link(&mut self, seq: u64, slot: Slot) {
        let position = self.position(seq);
        let bucket = &mut self.buckets[position];
        self.arena.set_next(slot, bucket.head);
        bucket.head = slot;
        bucket.count += 1;
    }

    /// Detaches the whole list of bucket `seq` and returns its head.
    fn clear(&mut self, seq: u64) -> Slot {
        let bucket = self.bucket_mut(seq);
        bucket.count = 0;
        std::mem::replace(&mut bucket.head, NULL_SLOT)
    }

    /// Detaches bucket `seq` and lets `visit` decide where each of its nodes goes.
    pub(crate) fn sweep(&mut self, seq: u64, mut visit: impl FnMut(&Arc<Node<V>>) -> Disposition) {
        let mut slot = self.clear(seq);

        while slot != NULL_SLOT {
            let next = self.arena.next(slot);
            let disposition = self.arena.node(slot).map_or(Disposition::Release, &mut visit);

            match disposition {
                Disposition::Keep(target) if target != seq => self.link(target, slot),
                Disposition::Keep(_) | Disposition::Release => self.arena.free(slot),
            }

            slot = next;
        }
    }

    /// Collects the valid nodes currently linked into bucket `seq`.
    pub(crate) fn valid_nodes(&self, seq: u64) -> Vec<Arc<Node<V>>> {
        let mut nodes = Vec::with_capacity(self.bucket(seq).count);
        let mut slot = self.bucket(seq).head;

        while slot != NULL_SLOT {
            if let Some(node) = self.arena.node(slot).filter(|node| node.is_valid()) {
                nodes.push(Arc::clone(node));
            }
            slot = self.arena.next(slot);
        }

        nodes
    }

    /// Marks every node in the ring invalid.
    pub(crate) fn invalidate_all(&self) {
        for node in self.arena.nodes() {
            node.evict();
        }
    }
}

impl<V> Debug for BucketRing<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketRing")
            .field("buckets", &self.len())
            .field("nodes", &self.node_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn node(value: u32) -> Arc<Node<u32>> {
        Arc::new(Node::new(value))
    }

    fn values(ring: &BucketRing<u32>, seq: u64) -> Vec<u32> {
        ring.valid_nodes(seq).iter().map(|node| *node.value()).collect()
    }

    #[test]
    fn push_prepends_and_assigns() {
        let mut ring = BucketRing::new(4);
        let first = node(1);

        ring.push(2, Arc::clone(&first));
        ring.push(2, node(2));

        assert_eq!(first.bucket(), 2);
        assert_eq!(values(&ring, 2), vec![2, 1]);
        assert_eq!(ring.bucket(2).count(), 2);
        assert_eq!(ring.node_count(), 2);
    }

    #[test]
    fn sequence_numbers_wrap_onto_the_ring() {
        let mut ring = BucketRing::new(4);

        ring.push(1, node(7));

        assert_eq!(values(&ring, 5), vec![7]);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn sweep_relinks_kept_nodes_and_frees_the_rest() {
        let mut ring = BucketRing::new(8);
        let stay = node(1);
        let go = node(2);
        ring.push(0, Arc::clone(&stay));
        ring.push(0, Arc::clone(&go));

        ring.sweep(0, |node| {
            if *node.value() == 1 {
                Disposition::Keep(3)
            } else {
                Disposition::Release
            }
        });

        assert_eq!(ring.bucket(0).count(), 0);
        assert!(values(&ring, 0).is_empty());
        assert_eq!(values(&ring, 3), vec![1]);
        assert_eq!(ring.bucket(3).count(), 1);
        assert_eq!(ring.node_count(), 1);
    }

    #[test]
    fn sweep_never_relinks_into_the_swept_bucket() {
        let mut ring = BucketRing::new(4);
        ring.push(1, node(1));

        ring.sweep(1, |_| Disposition::Keep(1));

        assert_eq!(ring.node_count(), 0);
        assert!(values(&ring, 1).is_empty());
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut ring = BucketRing::new(4);
        ring.push(0, node(1));
        ring.push(0, node(2));
        ring.sweep(0, |_| Disposition::Release);

        ring.push(1, node(3));
        ring.push(1, node(4));
        ring.push(1, node(5));

        assert_eq!(ring.arena.entries.len(), 3);
        assert_eq!(values(&ring, 1), vec![5, 4, 3]);
    }

    #[test]
    fn valid_nodes_skips_invalid() {
        let mut ring = BucketRing::new(4);
        let gone = node(1);
        ring.push(0, Arc::clone(&gone));
        ring.push(0, node(2));

        gone.evict();

        assert_eq!(values(&ring, 0), vec![2]);
    }

    #[test]
    fn invalidate_all_marks_every_node() {
        let mut ring = BucketRing::new(4);
        let a = node(1);
        let b = node(2);
        ring.push(0, Arc::clone(&a));
        ring.push(3, Arc::clone(&b));

        ring.invalidate_all();

        assert!(!a.is_valid());
        assert!(!b.is_valid());
    }

    #[test]
    fn bucket_age_checks_are_strict() {
        let start = Instant::now();
        let mut bucket = Bucket::empty();

        assert!(!bucket.has_expired(start + Duration::from_secs(1)));

        bucket.start(start);
        assert!(!bucket.has_expired(start));
        assert!(bucket.has_expired(start + Duration::from_millis(1)));
        assert!(!bucket.is_old_enough(start));
        assert!(bucket.is_old_enough(start + Duration::from_millis(1)));
    }

    #[test]
    fn start_and_stop_track_the_window() {
        let start = Instant::now();
        let mut bucket = Bucket::empty();

        bucket.start(start);
        assert_eq!(bucket.started(), Some(start));
        assert_eq!(bucket.stopped(), None);

        bucket.stop(start + Duration::from_secs(2));
        assert_eq!(bucket.stopped(), Some(start + Duration::from_secs(2)));
    }
}
