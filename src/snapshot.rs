//! Snapshot keyspace overlay (spec.md 4.9).
//!
//! Generalizes `src/storage/mvcc.rs`'s `VersionHeader{begin,end,flags}` /
//! `visible_at` / `CommitTable::oldest_visible` — the teacher's closest
//! direct analogue of snapshot-keyed visibility — from a flat commit-id
//! range to a tree of snapshot IDs with ancestor queries. True RCU needs
//! unsafe, which the teacher's lints forbid crate-wide; readers here get an
//! equivalent safe approximation via `parking_lot::RwLock` (see DESIGN.md,
//! Open Question decisions).

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Per-key version tag identifying which snapshot line a key belongs to
/// (spec.md glossary).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct SnapshotId(pub u32);

/// One node in the snapshot parent/child tree (spec.md 4.9).
#[derive(Clone, Debug)]
pub struct SnapshotNode {
    pub id: SnapshotId,
    pub parent: Option<SnapshotId>,
    pub children: [Option<SnapshotId>; 2],
    pub depth: u32,
    /// Ancestor IDs at increasing distance, used to skip long chains.
    pub skiplist: [Option<SnapshotId>; 3],
    /// The nearest ancestors in walk order (closest first), capped at 128
    /// entries; farther ancestors are reached via `skiplist` jumps instead
    /// of growing this list without bound.
    pub near_ancestors: Vec<SnapshotId>,
}

const NEAR_ANCESTOR_CAP: usize = 128;

/// Keeps the parent/child relations of snapshots and answers ancestor
/// queries (spec.md 4.9).
pub struct SnapshotTable {
    nodes: RwLock<HashMap<SnapshotId, SnapshotNode>>,
}

impl SnapshotTable {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            SnapshotId(1),
            SnapshotNode { id: SnapshotId(1), parent: None, children: [None, None], depth: 0, skiplist: [None; 3], near_ancestors: Vec::new() },
        );
        Self { nodes: RwLock::new(nodes) }
    }

    /// Create a child snapshot of `parent`, registered under the
    /// caller-supplied `new_id`, which must be unused (spec.md 4.9).
    pub fn create_child(&self, parent: SnapshotId, new_id: SnapshotId) -> Result<()> {
        let mut nodes = self.nodes.write();
        let parent_node = nodes.get(&parent).cloned().ok_or(Error::Enoent)?;
        if nodes.contains_key(&new_id) {
            return Err(Error::Eexist);
        }
        let depth = parent_node.depth + 1;
        let mut near_ancestors = Vec::with_capacity((parent_node.near_ancestors.len() + 1).min(NEAR_ANCESTOR_CAP));
        near_ancestors.push(parent);
        near_ancestors.extend(parent_node.near_ancestors.iter().copied());
        near_ancestors.truncate(NEAR_ANCESTOR_CAP);
        let skiplist = build_skiplist(&parent_node, parent);
        let child = SnapshotNode { id: new_id, parent: Some(parent), children: [None, None], depth, skiplist, near_ancestors };
        if let Some(p) = nodes.get_mut(&parent) {
            if p.children[0].is_none() {
                p.children[0] = Some(new_id);
            } else {
                p.children[1] = Some(new_id);
            }
        }
        nodes.insert(new_id, child);
        Ok(())
    }

    /// `is_ancestor(A, D)` (spec.md 4.9): true if `A` is `D` or a
    /// reflexive-transitive parent of `D`.
    pub fn is_ancestor(&self, ancestor: SnapshotId, descendant: SnapshotId) -> bool {
        if ancestor == descendant {
            return true;
        }
        let nodes = self.nodes.read();
        let Some(mut cur) = nodes.get(&descendant) else { return false };
        loop {
            if cur.near_ancestors.contains(&ancestor) {
                return true;
            }
            if cur.near_ancestors.len() < NEAR_ANCESTOR_CAP {
                // The whole chain up to the root fit in near_ancestors and
                // ancestor was not among them.
                return false;
            }
            // Jump via the farthest skiplist entry to cover more ground;
            // each jump strictly decreases depth, so this terminates.
            let jump = cur.skiplist.iter().flatten().last().copied().or(cur.parent);
            match jump.and_then(|id| nodes.get(&id)) {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }

    pub fn get(&self, id: SnapshotId) -> Option<SnapshotNode> {
        self.nodes.read().get(&id).cloned()
    }
}

impl Default for SnapshotTable {
    fn default() -> Self {
        Self::new()
    }
}

fn build_skiplist(parent: &SnapshotNode, parent_id: SnapshotId) -> [Option<SnapshotId>; 3] {
    let mut out = [Some(parent_id), None, None];
    let mut it = parent.skiplist.iter().flatten();
    if let Some(a) = it.next() {
        out[1] = Some(*a);
    }
    if let Some(b) = it.next() {
        out[2] = Some(*b);
    }
    out
}
