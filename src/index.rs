//! Fingerprint-keyed node index
//!
//! A multi-map from the 64-bit discrete fingerprint to the live nodes
//! carrying it. The cover engine scans one bucket per candidate state; the
//! table itself never deduplicates on zones, that is the cover predicate's
//! job. Removal is O(1): every node remembers its bucket position and the
//! hole is filled by the bucket's last element.

use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::graph::NodeRef;

/// Multi-map from fingerprint key to nodes.
pub struct NodeIndex {
    buckets: FxHashMap<u64, Vec<NodeRef>>,
    len: usize,
}

impl NodeIndex {
    pub fn new() -> NodeIndex {
        NodeIndex { buckets: FxHashMap::default(), len: 0 }
    }

    /// With room for roughly `capacity` keys up front.
    pub fn with_capacity(capacity: usize) -> NodeIndex {
        NodeIndex {
            buckets: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            len: 0,
        }
    }

    /// Insert under the node's key. Amortized O(1).
    pub fn insert(&mut self, node: &NodeRef) {
        let bucket = self.buckets.entry(node.key).or_default();
        node.bucket_pos.set(bucket.len());
        bucket.push(Rc::clone(node));
        self.len += 1;
    }

    /// All nodes stored under `key`, in insertion order up to removals.
    pub fn find(&self, key: u64) -> &[NodeRef] {
        self.buckets.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove `node` via its remembered bucket position. O(1).
    pub fn remove(&mut self, node: &NodeRef) {
        let bucket = match self.buckets.get_mut(&node.key) {
            Some(b) => b,
            None => return,
        };
        let pos = node.bucket_pos.get();
        debug_assert!(pos < bucket.len() && Rc::ptr_eq(&bucket[pos], node));
        bucket.swap_remove(pos);
        if let Some(moved) = bucket.get(pos) {
            moved.bucket_pos.set(pos);
        }
        node.bucket_pos.set(usize::MAX);
        if bucket.is_empty() {
            self.buckets.remove(&node.key);
        }
        self.len -= 1;
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

impl Default for NodeIndex {
    fn default() -> NodeIndex {
        NodeIndex::new()
    }
}
