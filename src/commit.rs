//! The eight-step commit pipeline (spec.md 4.8).
//!
//! Grounded on `src/pager/mod.rs::flush_pages_internal`'s checksum-then-WAL-
//! frames-then-commit-frame-then-sync ordering, combined with
//! `src/db/transaction.rs::commit`'s validate-then-mutate-then-publish shape.
//! Steps 1-4 may fail with a `transaction_restart`; steps 5-7 are expected to
//! always succeed once locks are held; a failure there would mean a fatal
//! I/O error and should force the filesystem read-only rather than be
//! retried (spec.md 4.8) — this reference implementation propagates such an
//! error to the caller rather than actually flipping a read-only flag, since
//! no part of the crate currently models mount state.

use std::collections::BTreeSet;

use crate::alloc::ReservationFlags;
use crate::bpos::BPos;
use crate::error::Result;
use crate::fs::{Fs, NODE_SPLIT_THRESHOLD};
use crate::journal::{FlushKind, JournalEntry};
use crate::lock::{LockMode, OrderKey};
use crate::node::NodeId;
use crate::trans::{CommitFlags, PendingUpdate};

/// Run the pipeline over every pending update of one transaction, returning
/// the journal seq the commit became visible at.
pub fn commit_updates(fs: &Fs, tx: u64, updates: &[PendingUpdate], flags: CommitFlags) -> Result<u64> {
    if updates.is_empty() {
        return Ok(fs.journal.flushed_seq());
    }

    // Step 1: validate every update's structural well-formedness.
    for u in updates {
        u.key.validate()?;
    }

    // Step 2: reserve journal space for the whole batch.
    let u64s: u64 = updates.iter().map(|u| u.key.compute_size() / 8 + 1).sum();
    let reservation = fs.journal.try_reserve(u64s)?;

    // Step 3: reserve the disk space the batch's keys describe.
    let sectors: u64 = updates.iter().map(|u| (u.key.compute_size() + 511) / 512).sum::<u64>().max(1);
    let _disk_reservation = fs.allocator.reservation_get(sectors, 1, ReservationFlags::default())?;

    // Step 4: upgrade intent -> write on every distinct leaf this commit
    // touches, in ascending (btree_id, position) order (spec.md 4.5).
    let mut touched: Vec<(u8, BPos, NodeId)> =
        updates.iter().map(|u| (u.btree_id as u8, u.key.position(), fs.find_leaf(u.btree_id, u.key.position()))).collect();
    touched.sort_by_key(|(b, p, _)| (*b, *p));
    touched.dedup_by_key(|(_, _, leaf)| *leaf);

    let mut held_keys: Vec<OrderKey> = Vec::new();
    let mut acquired: BTreeSet<NodeId> = BTreeSet::new();
    for (btree_tag, position, leaf) in &touched {
        let btree_id = crate::bkey::BtreeId::try_from(*btree_tag).expect("btree tag round-trips from a live update");
        let order_key = OrderKey { btree_id, level: 0, position: *position };
        fs.lock_table.try_acquire(*leaf, order_key, LockMode::Intent, tx, &held_keys)?;
        held_keys.push(order_key);
        fs.lock_table.try_acquire(*leaf, order_key, LockMode::Write, tx, &held_keys)?;
        acquired.insert(*leaf);
    }

    // Step 5: mutate in place, splitting any leaf that overflows.
    let mut entries = Vec::with_capacity(updates.len());
    for u in updates {
        fs.insert_key(u.btree_id, u.key.clone(), NODE_SPLIT_THRESHOLD)?;
        entries.push(JournalEntry::BtreeKey { btree_id: u.btree_id, level: 0, keys: vec![u.key.clone()] });
    }

    // Step 6: write the batch's journal entries using the reservation from
    // step 2.
    let flush = if flags.flush { FlushKind::Flush } else { FlushKind::Noflush };
    let seq = reservation.seq;
    fs.journal.commit_reservation(reservation, entries, flush);

    // Step 7: publish — the append above is the publish point; `seq` is now
    // visible to `Journal::fsync`.

    // Step 8: release every write lock taken in step 4.
    for leaf in acquired {
        fs.lock_table.release_write(leaf, tx);
    }

    Ok(seq)
}
