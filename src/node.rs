//! Node & node cache (spec.md 4.2).
//!
//! Grounded on `src/pager/mod.rs`'s `Pager` (`LruCache<PageId, Page>`,
//! `fetch_page` eviction-guards-dirty-pages logic, `verify_page_checksum`)
//! and `src/primitives/pager/frame.rs`'s `FrameState::{Hot, Cold, Test}` /
//! `pin_count` fields, generalized from fixed-schema graph pages to
//! btree nodes carrying an arbitrary number of bsets.

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::bkey::BtreeId;
use crate::bpos::BPos;
use crate::bset::{Bset, MergingIter, PackFormat};
use crate::codec::Checksum;
use crate::error::{Error, Result};

/// Stable identity for a resident node; paths store this, not pointers
/// (spec.md 9: "cyclic references").
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct NodeId(pub u64);

/// On-disk/in-memory btree node (spec.md 3).
#[derive(Clone, Debug)]
pub struct BtreeNode {
    pub id: NodeId,
    pub btree_id: BtreeId,
    pub level: u16,
    pub min: BPos,
    pub max: BPos,
    /// Bumped on every COW replacement of this node.
    pub seq: u64,
    pub bsets: Vec<Bset>,
    /// Per-bset checksum as verified at read-in time.
    pub bset_checksums: Vec<u32>,
    /// Set once a checksum or ordering invariant fails; commits against
    /// this node are refused (spec.md 4.1: `fatal_corruption`).
    pub read_error: bool,
}

impl BtreeNode {
    pub fn new_leaf(id: NodeId, btree_id: BtreeId, min: BPos, max: BPos) -> Self {
        Self { id, btree_id, level: 0, min, max, seq: 0, bsets: vec![Bset::new(PackFormat::UNPACKED)], bset_checksums: vec![0], read_error: false }
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn total_keys(&self) -> usize {
        self.bsets.iter().map(Bset::len).sum()
    }

    pub fn needs_compact(&self, threshold: usize) -> bool {
        self.bsets.len() > threshold
    }

    /// Merge all bsets into one sorted run (spec.md 4.2: "sort/compact").
    pub fn compact(&mut self) {
        if self.bsets.len() <= 1 {
            return;
        }
        let mut merged = Bset::new(PackFormat::UNPACKED);
        {
            let mut it = MergingIter::new(&self.bsets);
            while let Some(k) = it.next() {
                merged.append_unsorted(k.clone());
            }
        }
        merged.sort();
        self.bsets = vec![merged];
        self.bset_checksums = vec![0];
        self.seq += 1;
    }

    /// Verify every bset's checksum against its recorded value, marking
    /// `read_error` on mismatch (spec.md 4.2: "read-in").
    pub fn verify_checksums(&mut self, checksum: &dyn Checksum) -> Result<()> {
        for (bset, expected) in self.bsets.iter().zip(self.bset_checksums.iter()) {
            let bytes = bset_fingerprint(bset);
            let actual = checksum.checksum(&bytes);
            if actual != *expected {
                self.read_error = true;
                return Err(Error::FatalCorruption(format!(
                    "checksum mismatch on node {:?}: expected {expected:#x}, got {actual:#x}",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Recompute and store checksums for all bsets; called before a node
    /// becomes durable (spec.md 4.8, step 5-6).
    pub fn seal_checksums(&mut self, checksum: &dyn Checksum) {
        self.bset_checksums = self.bsets.iter().map(|b| checksum.checksum(&bset_fingerprint(b))).collect();
    }

    /// Validate invariant 2 against a set of child ranges (interior nodes).
    pub fn validate_child_partition(children: &[(BPos, BPos)]) -> Result<()> {
        for w in children.windows(2) {
            if w[0].1 >= w[1].0 {
                return Err(Error::FatalCorruption("child ranges overlap or are non-contiguous".into()));
            }
        }
        Ok(())
    }
}

fn bset_fingerprint(b: &Bset) -> Vec<u8> {
    let mut out = Vec::with_capacity(b.len() * 24);
    for k in b.keys() {
        out.extend_from_slice(&k.position().encode());
        out.extend_from_slice(&k.header.version.to_le_bytes());
        out.extend_from_slice(&k.value);
    }
    out
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum FrameState {
    /// Pinned: held under intent/write by some transaction, not evictable.
    Hot,
    /// Evictable.
    Cold,
}

struct Resident {
    node: Arc<Mutex<BtreeNode>>,
    state: FrameState,
    pin_count: u32,
}

/// Bounded-size set of resident nodes with pinned/evictable tiers and a
/// cannibalize lock (spec.md 4.2).
pub struct NodeCache {
    lru: Mutex<LruCache<NodeId, Resident>>,
    /// Fallback (btree_id, level, position, seq) -> disk location, kept
    /// after eviction to short-circuit future reads (spec.md 4.2).
    location_index: Mutex<HashMap<NodeId, u64>>,
    /// True while a thread is cannibalizing for space; see `cannibalize`.
    cannibalizing: Mutex<bool>,
    pub bfloat_fallback_count: std::sync::atomic::AtomicU64,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            lru: Mutex::new(LruCache::new(cap)),
            location_index: Mutex::new(HashMap::new()),
            cannibalizing: Mutex::new(false),
            bfloat_fallback_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Insert or refresh a resident node; newly inserted nodes start cold.
    pub fn insert(&self, node: BtreeNode) -> Arc<Mutex<BtreeNode>> {
        let id = node.id;
        let handle = Arc::new(Mutex::new(node));
        let mut lru = self.lru.lock();
        lru.put(id, Resident { node: handle.clone(), state: FrameState::Cold, pin_count: 0 });
        handle
    }

    pub fn get(&self, id: NodeId) -> Option<Arc<Mutex<BtreeNode>>> {
        let mut lru = self.lru.lock();
        lru.get(&id).map(|r| r.node.clone())
    }

    /// Pin a node (intent/write held on it), moving it into the hot tier.
    pub fn pin(&self, id: NodeId) {
        let mut lru = self.lru.lock();
        if let Some(r) = lru.get_mut(&id) {
            r.pin_count += 1;
            r.state = FrameState::Hot;
        }
    }

    /// Release a pin; returns to the cold/evictable tier once it reaches zero.
    pub fn unpin(&self, id: NodeId) {
        let mut lru = self.lru.lock();
        if let Some(r) = lru.get_mut(&id) {
            r.pin_count = r.pin_count.saturating_sub(1);
            if r.pin_count == 0 {
                r.state = FrameState::Cold;
            }
        }
    }

    /// Evict the least-recently-used cold node, recording its disk location
    /// so future reads can be short-circuited (spec.md 4.2: "eviction").
    pub fn evict_one(&self, last_known_offset: impl Fn(NodeId) -> u64) -> Option<NodeId> {
        let mut lru = self.lru.lock();
        let victim = lru
            .iter()
            .find(|(_, r)| r.state == FrameState::Cold && r.pin_count == 0)
            .map(|(id, _)| *id);
        if let Some(id) = victim {
            lru.pop(&id);
            self.location_index.lock().insert(id, last_known_offset(id));
        }
        victim
    }

    /// Cannibalize: evict a victim even under shared reference pressure,
    /// provided no intent/write lock is outstanding (spec.md 4.2). Exclusive
    /// access to the cannibalize path is itself serialized by a flag so two
    /// threads cannot cannibalize the same victim concurrently.
    pub fn cannibalize<F>(&self, last_known_offset: F) -> Option<NodeId>
    where
        F: Fn(NodeId) -> u64,
    {
        let mut guard = self.cannibalizing.lock();
        if *guard {
            return None;
        }
        *guard = true;
        let result = self.evict_one(last_known_offset);
        *guard = false;
        result
    }

    pub fn last_known_location(&self, id: NodeId) -> Option<u64> {
        self.location_index.lock().get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Crc32Checksum;

    fn leaf(id: u64) -> BtreeNode {
        BtreeNode::new_leaf(NodeId(id), BtreeId::Inodes, crate::bpos::POS_MIN, crate::bpos::POS_MAX)
    }

    #[test]
    fn cache_insert_and_get() {
        let cache = NodeCache::new(4);
        cache.insert(leaf(1));
        assert!(cache.get(NodeId(1)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn pinned_nodes_are_not_evicted() {
        let cache = NodeCache::new(1);
        cache.insert(leaf(1));
        cache.pin(NodeId(1));
        assert!(cache.evict_one(|_| 0).is_none());
        cache.unpin(NodeId(1));
        assert_eq!(cache.evict_one(|_| 42), Some(NodeId(1)));
        assert_eq!(cache.last_known_location(NodeId(1)), Some(42));
    }

    #[test]
    fn checksum_mismatch_marks_read_error() {
        let mut n = leaf(1);
        let cs = Crc32Checksum;
        n.seal_checksums(&cs);
        n.bset_checksums[0] ^= 1;
        assert!(n.verify_checksums(&cs).is_err());
        assert!(n.read_error);
    }

    #[test]
    fn compact_merges_bsets_into_one() {
        use crate::bkey::{Bkey, BkeyType};
        let mut n = leaf(1);
        n.bsets[0].insert_sorted(Bkey::point(BPos::new(1, 0, 0), BkeyType::InodeV3, 0, vec![])).unwrap();
        n.bsets.push(Bset::new(PackFormat::UNPACKED));
        n.bsets[1].insert_sorted(Bkey::point(BPos::new(2, 0, 0), BkeyType::InodeV3, 0, vec![])).unwrap();
        n.compact();
        assert_eq!(n.bsets.len(), 1);
        assert_eq!(n.total_keys(), 2);
    }
}
