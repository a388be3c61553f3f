//! `bset` — a sorted run of keys sharing a packing format (spec.md 3, 4.1).
//!
//! The slot-directory-over-payload shape follows
//! `src/storage/btree/tree/definition/types.rs::SlotView`; the merge-by-
//! newest-bset-wins tie-break generalizes the ordered single-stream scan in
//! `storage/mvcc.rs::CommitTable`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::bkey::Bkey;
use crate::bpos::BPos;
use crate::error::{Error, Result};

/// Per-component `(offset, bit_width)` packing descriptor (spec.md 4.1).
#[derive(Clone, Copy, Debug)]
pub struct PackFormat {
    pub inode_offset: u64,
    pub inode_bits: u8,
    pub offset_offset: u64,
    pub offset_bits: u8,
    pub snapshot_offset: u32,
    pub snapshot_bits: u8,
}

impl PackFormat {
    /// A format that fits any key without truncation (always "fits").
    pub const UNPACKED: PackFormat =
        PackFormat { inode_offset: 0, inode_bits: 64, offset_offset: 0, offset_bits: 64, snapshot_offset: 0, snapshot_bits: 32 };

    /// Whether `pos` can be represented losslessly under this format.
    pub fn fits(&self, pos: &BPos) -> bool {
        fits_field(pos.inode, self.inode_offset, self.inode_bits)
            && fits_field(pos.offset, self.offset_offset, self.offset_bits)
            && fits_field(pos.snapshot as u64, self.snapshot_offset as u64, self.snapshot_bits)
    }

    /// Pack `pos` into a dense prefix used for bfloat comparisons. Returns
    /// `None` if `pos` does not fit and the key must fall back to unpacked
    /// storage (spec.md 4.1: "a key that does not fit a node's format is
    /// stored unpacked and flagged"), or if the format's component widths are
    /// too wide to concatenate into a single `u64` prefix at all — notably
    /// `UNPACKED` itself (64 + 64 + 32 bits), the only format this crate ever
    /// constructs. Such formats simply never get a bfloat prefix; lookups
    /// fall back to the linear scan `BfloatIndex::failed` already provides.
    pub fn pack(&self, pos: &BPos) -> Option<u64> {
        if !self.fits(pos) {
            return None;
        }
        let total_bits = self.inode_bits as u32 + self.offset_bits as u32 + self.snapshot_bits as u32;
        if total_bits > 64 {
            return None;
        }
        let inode = pos.inode - self.inode_offset;
        let offset = pos.offset - self.offset_offset;
        let snap = pos.snapshot as u64 - self.snapshot_offset as u64;
        // `total_bits <= 64` guarantees these shift amounts stay below 64
        // whenever the shifted value can be nonzero; `.min(63)` only clamps
        // the degenerate case where a zero-width field would otherwise shift
        // by exactly 64, and such a field's value is always 0 (its `fits`
        // check forces the delta to 0), so clamping changes nothing.
        let shift_hi = (self.offset_bits as u32 + self.snapshot_bits as u32).min(63);
        let shift_mid = (self.snapshot_bits as u32).min(63);
        Some((inode << shift_hi) | (offset << shift_mid) | snap)
    }
}

fn fits_field(v: u64, offset: u64, bits: u8) -> bool {
    if v < offset {
        return false;
    }
    let delta = v - offset;
    bits >= 64 || delta < (1u64 << bits)
}

/// Eytzinger-laid-out search index over packed key prefixes ("bfloat",
/// spec.md 4.1). Built once per bset after a sort/compact.
#[derive(Clone, Debug, Default)]
pub struct BfloatIndex {
    /// Eytzinger-order array of (packed prefix, original slot index).
    tree: Vec<(u64, u32)>,
    /// True once any key in the bset could not be packed into a prefix;
    /// lookups then fall back to a full linear scan (spec.md 9, open
    /// question ii: correctness-preserving slow path, instrumented not hidden).
    pub failed: bool,
}

impl BfloatIndex {
    /// Build the index from a sorted slice of (packed_prefix_or_none, slot).
    pub fn build(entries: &[(Option<u64>, u32)]) -> Self {
        let failed = entries.iter().any(|(p, _)| p.is_none());
        let mut sorted: Vec<(u64, u32)> =
            entries.iter().filter_map(|(p, i)| p.map(|v| (v, *i))).collect();
        sorted.sort_unstable_by_key(|(v, _)| *v);
        let n = sorted.len();
        let mut tree = vec![(0u64, u32::MAX); n];
        let mut cursor = 0usize;
        eytzinger_fill(&sorted, &mut tree, &mut cursor, 0);
        Self { tree, failed }
    }

    /// Descend the eytzinger tree for the largest prefix `<= target`.
    /// Returns a starting slot hint; callers still linearly scan a bounded
    /// run around it to resolve prefix collisions (spec.md 4.1).
    pub fn search(&self, target: u64) -> Option<u32> {
        if self.tree.is_empty() {
            return None;
        }
        let mut i = 0usize;
        let mut best: Option<u32> = None;
        while i < self.tree.len() {
            let (v, slot) = self.tree[i];
            if slot == u32::MAX {
                break;
            }
            match v.cmp(&target) {
                Ordering::Equal => return Some(slot),
                Ordering::Less => {
                    best = Some(slot);
                    i = 2 * i + 2;
                }
                Ordering::Greater => {
                    i = 2 * i + 1;
                }
            }
        }
        best
    }
}

fn eytzinger_fill(sorted: &[(u64, u32)], tree: &mut [(u64, u32)], cursor: &mut usize, i: usize) {
    if i >= tree.len() {
        return;
    }
    eytzinger_fill(sorted, tree, cursor, 2 * i + 1);
    if *cursor < sorted.len() {
        tree[i] = sorted[*cursor];
        *cursor += 1;
    }
    eytzinger_fill(sorted, tree, cursor, 2 * i + 2);
}

/// A sorted run of keys sharing one packing format (spec.md 3).
#[derive(Clone, Debug)]
pub struct Bset {
    pub format: PackFormat,
    keys: Vec<Bkey>,
    bfloat: BfloatIndex,
}

impl Bset {
    pub fn new(format: PackFormat) -> Self {
        Self { format, keys: Vec::new(), bfloat: BfloatIndex::default() }
    }

    /// Insert preserving sort order by `(position, version)`; O(n) but
    /// bsets are kept small by the node's compact threshold. A key already
    /// present at `key.position()` is replaced rather than kept alongside
    /// the new one — a bset holds at most one entry per position, with
    /// older writes to the same position superseded here rather than left
    /// for `MergingIter` to arbitrate, since that merge only resolves ties
    /// *across* bsets.
    pub fn insert_sorted(&mut self, key: Bkey) -> Result<()> {
        key.validate()?;
        if let Ok(existing) = self.keys.binary_search_by_key(&key.position(), |k| k.position()) {
            self.keys.remove(existing);
        }
        let idx = self
            .keys
            .partition_point(|k| (k.position(), k.header.version) < (key.position(), key.header.version));
        self.keys.insert(idx, key);
        self.rebuild_index();
        Ok(())
    }

    /// Append without maintaining order; used while bulk-loading a new bset
    /// before a single `sort()` + `rebuild_index()` pass.
    pub fn append_unsorted(&mut self, key: Bkey) {
        self.keys.push(key);
    }

    pub fn sort(&mut self) {
        self.keys.sort_by(|a, b| (a.position(), a.header.version).cmp(&(b.position(), b.header.version)));
        self.rebuild_index();
    }

    pub fn rebuild_index(&mut self) {
        let entries: Vec<(Option<u64>, u32)> = self
            .keys
            .iter()
            .enumerate()
            .map(|(i, k)| (self.format.pack(&k.position()), i as u32))
            .collect();
        self.bfloat = BfloatIndex::build(&entries);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[Bkey] {
        &self.keys
    }

    pub fn bfloat_failed(&self) -> bool {
        self.bfloat.failed
    }

    /// Find the greatest key with position `<= target`, using the bfloat
    /// index with a linear fallback (spec.md 4.1).
    pub fn find_le(&self, target: BPos) -> Option<&Bkey> {
        if self.keys.is_empty() {
            return None;
        }
        if self.bfloat.failed {
            return self.keys.iter().rev().find(|k| k.position() <= target);
        }
        if let Some(packed) = self.format.pack(&target) {
            if let Some(hint) = self.bfloat.search(packed) {
                let mut i = hint as usize;
                // Bounded scan to resolve prefix collisions / off-by-ones.
                while i < self.keys.len() && self.keys[i].position() <= target {
                    i += 1;
                }
                if i > 0 {
                    return Some(&self.keys[i - 1]);
                }
                return None;
            }
        }
        self.keys.iter().rev().find(|k| k.position() <= target)
    }

    pub fn validate_sorted(&self) -> Result<()> {
        for w in self.keys.windows(2) {
            let a = (w[0].position(), w[0].header.version);
            let b = (w[1].position(), w[1].header.version);
            if a >= b {
                return Err(Error::FatalCorruption("bset keys not strictly sorted".into()));
            }
        }
        Ok(())
    }
}

/// One cursor into a bset for the merging iterator.
struct Cursor<'a> {
    bset_index: usize,
    keys: &'a [Bkey],
    pos: usize,
}

/// Heap entry ordered by `(position, bset_index_desc)` so that, among ties,
/// the most-recently-written bset wins (spec.md 4.1).
struct HeapEntry<'a> {
    key: &'a Bkey,
    bset_index: usize,
    cursor_slot: usize,
}

impl<'a> PartialEq for HeapEntry<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.key.position() == other.key.position() && self.bset_index == other.bset_index
    }
}
impl<'a> Eq for HeapEntry<'a> {}

impl<'a> Ord for HeapEntry<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the smallest position first and,
        // among equal positions, the largest bset_index (newest) first, so
        // invert position and keep bset_index as-is.
        other
            .key
            .position()
            .cmp(&self.key.position())
            .then(self.bset_index.cmp(&other.bset_index))
    }
}
impl<'a> PartialOrd for HeapEntry<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges several bsets into one logically deduplicated, ordered view
/// (spec.md 4.1).
pub struct MergingIter<'a> {
    cursors: Vec<Cursor<'a>>,
    heap: BinaryHeap<HeapEntry<'a>>,
    last_emitted: Option<BPos>,
}

impl<'a> MergingIter<'a> {
    pub fn new(bsets: &'a [Bset]) -> Self {
        let mut cursors: Vec<Cursor<'a>> = bsets
            .iter()
            .enumerate()
            .map(|(i, b)| Cursor { bset_index: i, keys: b.keys(), pos: 0 })
            .collect();
        let mut heap = BinaryHeap::new();
        for (slot, c) in cursors.iter_mut().enumerate() {
            if let Some(k) = c.keys.first() {
                heap.push(HeapEntry { key: k, bset_index: c.bset_index, cursor_slot: slot });
            }
        }
        Self { cursors, heap, last_emitted: None }
    }

    /// Returns the next visible key, skipping positions already emitted
    /// (older bsets lose ties) and dropping tombstoned positions from the
    /// caller's view but exposing them via `peek_raw` when needed.
    pub fn next(&mut self) -> Option<&'a Bkey> {
        loop {
            let entry = self.heap.pop()?;
            let slot = entry.cursor_slot;
            self.cursors[slot].pos += 1;
            if let Some(k) = self.cursors[slot].keys.get(self.cursors[slot].pos) {
                self.heap.push(HeapEntry { key: k, bset_index: self.cursors[slot].bset_index, cursor_slot: slot });
            }
            if self.last_emitted == Some(entry.key.position()) {
                continue;
            }
            self.last_emitted = Some(entry.key.position());
            return Some(entry.key);
        }
    }
}
