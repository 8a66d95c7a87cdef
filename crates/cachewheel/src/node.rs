// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Bucket handle of a node that no longer belongs to any bucket.
pub(crate) const NO_BUCKET: u64 = u64::MAX;

/// A cached value together with its bucket bookkeeping.
///
/// Nodes are shared through `Arc` between the tracker, every index that maps a key to them,
/// and callers that hold on to the node returned by [`Cache::add`](crate::Cache::add). The
/// bucket a node belongs to is a plain sequence number, so moving a node to a newer bucket
/// is a single store.
pub struct Node<V> {
    value: V,
    bucket: AtomicU64,
    valid: AtomicBool,
}

impl<V> Node<V> {
    pub(crate) fn new(value: V) -> Self {
        Self {
            value,
            bucket: AtomicU64::new(NO_BUCKET),
            valid: AtomicBool::new(true),
        }
    }

    /// Returns the cached value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns `false` once the node has been evicted, removed, or cleared.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn bucket(&self) -> u64 {
        self.bucket.load(Ordering::Acquire)
    }

    /// Only called while the ring lock is held.
    pub(crate) fn assign(&self, bucket: u64) {
        self.bucket.store(bucket, Ordering::Release);
    }

    /// Marks the node invalid. Returns `true` for the caller that made the transition, which
    /// then owns the removal bookkeeping.
    pub(crate) fn evict(&self) -> bool {
        let evicted = self.valid.swap(false, Ordering::AcqRel);
        if evicted {
            self.bucket.store(NO_BUCKET, Ordering::Release);
        }
        evicted
    }
}

impl<V: Debug> Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("value", &self.value)
            .field("bucket", &self.bucket())
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_valid_and_unassigned() {
        let node = Node::new("a");

        assert!(node.is_valid());
        assert_eq!(node.bucket(), NO_BUCKET);
        assert_eq!(*node.value(), "a");
    }

    #[test]
    fn evict_transitions_once() {
        let node = Node::new(1);
        node.assign(4);

        assert!(node.evict());
        assert!(!node.evict());
        assert!(!node.is_valid());
        assert_eq!(node.bucket(), NO_BUCKET);
    }

    #[test]
    fn debug_shows_bookkeeping() {
        let node = Node::new(5);
        node.assign(2);

        let text = format!("{node:?}");
        assert!(text.contains("bucket: 2"), "{text}");
        assert!(text.contains("valid: true"), "{text}");
    }
}
