//! Iterators over btree keyspaces (spec.md 4.7).
//!
//! Grounded on `storage/btree/tree/definition/api.rs`'s `range`/`Cursor`
//! plus `storage/mvcc.rs`'s `visible_at`, combined into one forward/backward
//! cursor with snapshot filtering, extent awareness, and a synthetic-
//! tombstone "slot" mode.

use std::collections::HashMap;

use crate::bkey::{Bkey, BtreeId};
use crate::bpos::BPos;
use crate::error::Result;
use crate::fs::Fs;
use crate::snapshot::SnapshotId;

/// What a point lookup should return for a position with no real key
/// (spec.md 4.7).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum SlotMode {
    /// Absent positions are simply not returned.
    KeysOnly,
    /// Absent positions yield a synthetic whiteout via `peek_slot`.
    Slots,
}

/// A read-only cursor over one btree's keyspace at a fixed snapshot
/// (spec.md 4.7). Built once over the full visible range; `next`/`prev`
/// walk an in-memory sorted copy rather than re-descending the tree on every
/// step.
pub struct BtreeIter<'f> {
    is_extents: bool,
    slot_mode: SlotMode,
    keys: Vec<Bkey>,
    cursor: usize,
    _fs: &'f Fs,
}

impl<'f> BtreeIter<'f> {
    /// `iter_init(btree_id, from, to, snapshot, slot_mode)` (spec.md 4.7).
    pub fn new(fs: &'f Fs, btree_id: BtreeId, from: BPos, to: BPos, snapshot: SnapshotId, slot_mode: SlotMode) -> Self {
        let mut raw = fs.range(btree_id, from, to);
        raw.sort_by_key(|k| k.position());

        let keys = if btree_id.has_snapshots() {
            let mut groups: HashMap<(u64, u64), Vec<Bkey>> = HashMap::new();
            for k in raw {
                groups.entry((k.position().inode, k.position().offset)).or_default().push(k);
            }
            let mut visible: Vec<Bkey> = groups
                .into_values()
                .filter_map(|mut group| {
                    group.retain(|k| fs.snapshots.is_ancestor(SnapshotId(k.position().snapshot), snapshot));
                    if group.is_empty() {
                        return None;
                    }
                    // Walk from the deepest (nearest) ancestor downward so a
                    // tombstone written in a closer snapshot only masks the
                    // keys *it* shadows, not an older ancestor's live key
                    // further back in the lineage (spec.md 8 scenario 4:
                    // deleting in a child snapshot must reveal the next-
                    // deepest non-tombstone ancestor, not hide it).
                    group.sort_by_key(|k| std::cmp::Reverse(fs.snapshots.get(SnapshotId(k.position().snapshot)).map(|n| n.depth).unwrap_or(0)));
                    match group.iter().position(|k| !k.is_tombstone()) {
                        Some(i) => Some(group.swap_remove(i)),
                        // Every visible ancestor is a tombstone; keep the
                        // deepest one so `peek_slot` under `SlotMode::Slots`
                        // can still return the real tombstone rather than a
                        // synthesized one. The filter below drops it again
                        // for `KeysOnly` iteration.
                        None => Some(group.remove(0)),
                    }
                })
                .filter(|k| slot_mode == SlotMode::Slots || !k.is_tombstone())
                .collect();
            visible.sort_by_key(|k| k.position());
            visible
        } else {
            raw
        };

        Self { is_extents: btree_id.is_extents(), slot_mode, keys, cursor: 0, _fs: fs }
    }

    pub fn is_extents(&self) -> bool {
        self.is_extents
    }

    pub fn peek(&self) -> Option<&Bkey> {
        self.keys.get(self.cursor)
    }

    pub fn peek_prev(&self) -> Option<&Bkey> {
        self.cursor.checked_sub(1).and_then(|i| self.keys.get(i))
    }

    /// `peek_slot(position)` (spec.md 4.7): look up `position` exactly,
    /// returning a synthetic whiteout when the slot is absent. Only
    /// meaningful under `SlotMode::Slots`; `KeysOnly` iterators never
    /// materialize an entry for an absent position.
    pub fn peek_slot(&self, position: BPos) -> Option<Bkey> {
        match self.keys.binary_search_by_key(&position, |k| k.position()) {
            Ok(idx) => Some(self.keys[idx].clone()),
            Err(_) if self.slot_mode == SlotMode::Slots => Some(Bkey::tombstone(position, 0)),
            Err(_) => None,
        }
    }

    pub fn next(&mut self) -> Option<Bkey> {
        let k = self.keys.get(self.cursor).cloned();
        if k.is_some() {
            self.cursor += 1;
        }
        k
    }

    pub fn prev(&mut self) -> Option<Bkey> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.keys.get(self.cursor).cloned()
    }

    pub fn advance(&mut self) {
        if self.cursor < self.keys.len() {
            self.cursor += 1;
        }
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

/// In-memory overlay for `cached`-flagged trees (spec.md 4.7): reads consult
/// this first; writes land here and are written back to the real tree by
/// [`KeyCache::flush`].
#[derive(Default)]
pub struct KeyCache {
    entries: HashMap<(BtreeId, BPos), Bkey>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, btree_id: BtreeId, position: BPos) -> Option<&Bkey> {
        self.entries.get(&(btree_id, position))
    }

    pub fn put(&mut self, btree_id: BtreeId, key: Bkey) {
        self.entries.insert((btree_id, key.position()), key);
    }

    /// Write every cached entry back to the real tree (spec.md 4.7).
    pub fn flush(&mut self, fs: &Fs, threshold: usize) -> Result<()> {
        for ((btree_id, _), key) in self.entries.drain() {
            fs.insert_key(btree_id, key, threshold)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bkey::BkeyType;
    use crate::bpos::{POS_MAX, POS_MIN};
    use crate::fs::{test_fs, NODE_SPLIT_THRESHOLD};

    #[test]
    fn forward_and_backward_walk_match() {
        let fs = test_fs(64);
        for i in [1u64, 2, 3] {
            fs.insert_key(BtreeId::Dirents, Bkey::point(BPos::new(i, 0, 0), BkeyType::Dirent, 1, vec![]), NODE_SPLIT_THRESHOLD).unwrap();
        }
        let mut it = BtreeIter::new(&fs, BtreeId::Dirents, POS_MIN, POS_MAX, SnapshotId(1), SlotMode::KeysOnly);
        let forward: Vec<u64> = std::iter::from_fn(|| it.next()).map(|k| k.position().inode).collect();
        assert_eq!(forward, vec![1, 2, 3]);
        assert_eq!(it.prev().unwrap().position().inode, 3);
    }

    #[test]
    fn slot_mode_synthesizes_tombstone_for_absent_position() {
        let fs = test_fs(64);
        let it = BtreeIter::new(&fs, BtreeId::Dirents, POS_MIN, POS_MAX, SnapshotId(1), SlotMode::Slots);
        let slot = it.peek_slot(BPos::new(42, 0, 0)).unwrap();
        assert!(slot.is_tombstone());
    }

    #[test]
    fn snapshot_filter_hides_keys_from_unrelated_branches() {
        let fs = test_fs(64);
        fs.snapshots.create_child(SnapshotId(1), SnapshotId(2)).unwrap();
        fs.snapshots.create_child(SnapshotId(1), SnapshotId(3)).unwrap();
        fs.insert_key(BtreeId::Dirents, Bkey::point(BPos::new(1, 0, 2), BkeyType::Dirent, 1, vec![]), NODE_SPLIT_THRESHOLD).unwrap();
        let mut it_same = BtreeIter::new(&fs, BtreeId::Dirents, POS_MIN, POS_MAX, SnapshotId(2), SlotMode::KeysOnly);
        assert!(it_same.next().is_some());
        let mut it_sibling = BtreeIter::new(&fs, BtreeId::Dirents, POS_MIN, POS_MAX, SnapshotId(3), SlotMode::KeysOnly);
        assert!(it_sibling.next().is_none());
    }

    #[test]
    fn deleting_a_snapshots_override_reveals_the_ancestors_key() {
        let fs = test_fs(64);
        fs.snapshots.create_child(SnapshotId(1), SnapshotId(2)).unwrap();
        let pos_root = BPos::new(1, 0, 1);
        let pos_child = BPos::new(1, 0, 2);

        fs.insert_key(BtreeId::Xattrs, Bkey::point(pos_root, BkeyType::Xattr, 1, b"ancestor".to_vec()), NODE_SPLIT_THRESHOLD).unwrap();
        fs.insert_key(BtreeId::Xattrs, Bkey::point(pos_child, BkeyType::Xattr, 2, b"child".to_vec()), NODE_SPLIT_THRESHOLD).unwrap();

        let mut it = BtreeIter::new(&fs, BtreeId::Xattrs, POS_MIN, POS_MAX, SnapshotId(2), SlotMode::KeysOnly);
        assert_eq!(it.next().unwrap().value, b"child".to_vec());

        // Delete the child's own override; the ancestor's key must now be
        // what a lookup at snapshot 2 returns, not nothing.
        fs.insert_key(BtreeId::Xattrs, Bkey::tombstone(pos_child, 3), NODE_SPLIT_THRESHOLD).unwrap();

        let mut it = BtreeIter::new(&fs, BtreeId::Xattrs, POS_MIN, POS_MAX, SnapshotId(2), SlotMode::KeysOnly);
        let visible = it.next().expect("deleting the override must reveal the ancestor's key, not hide it");
        assert_eq!(visible.value, b"ancestor".to_vec());
    }

    #[test]
    fn key_cache_flush_writes_back_to_the_real_tree() {
        let fs = test_fs(64);
        let mut cache = KeyCache::new();
        cache.put(BtreeId::Xattrs, Bkey::point(BPos::new(9, 0, 0), BkeyType::Xattr, 1, vec![1]));
        cache.flush(&fs, NODE_SPLIT_THRESHOLD).unwrap();
        assert_eq!(fs.range(BtreeId::Xattrs, POS_MIN, POS_MAX).len(), 1);
    }
}
