//! Per-node locking protocol (spec.md 4.5).
//!
//! The RAII guard / `parking_lot::Mutex`-protected state struct idiom
//! follows `src/primitives/concurrency/mod.rs`'s `SingleWriter`, generalized
//! from one whole-database lock to a table of per-`NodeId` locks, with
//! trylock-and-restart replacing `SingleWriter`'s OS-level blocking
//! acquisition (spec.md 4.5: "any acquisition that would violate order must
//! fail with a restart code rather than block").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bkey::BtreeId;
use crate::bpos::BPos;
use crate::error::{Error, RestartReason, Result};
use crate::node::NodeId;

/// Lock mode requested for a node (spec.md 4.5).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum LockMode {
    Read,
    Intent,
    Write,
}

#[derive(Default)]
struct LockState {
    readers: u32,
    intent_holder: Option<u64>,
    writer: Option<u64>,
    /// Bumped on every release of write; readers validate it has not moved.
    seq: u32,
}

/// A single node's lock (spec.md 4.5: "every lock has a 32-bit sequence
/// number incremented on every release of write").
pub struct NodeLock {
    state: Mutex<LockState>,
    seq_pub: AtomicU32,
}

impl NodeLock {
    fn new() -> Self {
        Self { state: Mutex::new(LockState::default()), seq_pub: AtomicU32::new(0) }
    }

    /// The current sequence number, stable to read without holding any lock.
    pub fn seq(&self) -> u32 {
        self.seq_pub.load(Ordering::Acquire)
    }

    fn try_read(&self) -> bool {
        let mut s = self.state.lock();
        if s.writer.is_some() {
            return false;
        }
        s.readers += 1;
        true
    }

    fn release_read(&self) {
        let mut s = self.state.lock();
        s.readers = s.readers.saturating_sub(1);
    }

    fn try_intent(&self, tx: u64) -> bool {
        let mut s = self.state.lock();
        if s.intent_holder.is_some() && s.intent_holder != Some(tx) {
            return false;
        }
        s.intent_holder = Some(tx);
        true
    }

    fn try_upgrade_write(&self, tx: u64) -> bool {
        let mut s = self.state.lock();
        if s.intent_holder != Some(tx) {
            return false;
        }
        if s.readers > 0 || s.writer.is_some() {
            return false;
        }
        s.writer = Some(tx);
        true
    }

    fn release_write(&self, tx: u64) {
        let mut s = self.state.lock();
        if s.writer == Some(tx) {
            s.writer = None;
            s.intent_holder = None;
            self.seq_pub.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn release_intent(&self, tx: u64) {
        let mut s = self.state.lock();
        if s.intent_holder == Some(tx) {
            s.intent_holder = None;
        }
    }
}

/// Per-transaction fairness tracker: after N consecutive restarts of the
/// same call-site, priority is bumped (spec.md 9, open question i).
#[derive(Default)]
pub struct RestartBudget {
    consecutive: HashMap<&'static str, u32>,
}

impl RestartBudget {
    pub fn record_restart(&mut self, site: &'static str, threshold: u32) -> bool {
        let counter = self.consecutive.entry(site).or_insert(0);
        *counter += 1;
        *counter >= threshold
    }

    pub fn reset(&mut self, site: &'static str) {
        self.consecutive.insert(site, 0);
    }
}

/// Ordering key for lock acquisition: `(btree_id, level desc, position asc)`
/// (spec.md 4.5).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct OrderKey {
    pub btree_id: BtreeId,
    pub level: u16,
    pub position: BPos,
}

impl OrderKey {
    /// Comparable tuple with level negated so "desc" becomes a normal `<`.
    fn sort_key(&self) -> (u8, std::cmp::Reverse<u16>, BPos) {
        (self.btree_id as u8, std::cmp::Reverse(self.level), self.position)
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Table of per-node locks plus per-transaction ordering validation
/// (spec.md 4.5).
pub struct LockTable {
    locks: Mutex<HashMap<NodeId, Arc<NodeLock>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    fn lock_for(&self, id: NodeId) -> Arc<NodeLock> {
        self.locks.lock().entry(id).or_insert_with(|| Arc::new(NodeLock::new())).clone()
    }

    /// Try to acquire `mode` on `id` for transaction `tx`, given the
    /// ordering keys already held by `tx` (must be empty or `<= key`).
    /// Returns the node's observed sequence number on success.
    pub fn try_acquire(
        &self,
        id: NodeId,
        key: OrderKey,
        mode: LockMode,
        tx: u64,
        held_order_keys: &[OrderKey],
    ) -> Result<u32> {
        if let Some(last) = held_order_keys.last() {
            if *last > key {
                return Err(Error::restart(RestartReason::LockNodeReused));
            }
        }
        let lock = self.lock_for(id);
        let ok = match mode {
            LockMode::Read => lock.try_read(),
            LockMode::Intent => lock.try_intent(tx),
            LockMode::Write => lock.try_upgrade_write(tx),
        };
        if !ok {
            return Err(Error::restart(RestartReason::RelockFail));
        }
        Ok(lock.seq())
    }

    /// Validate a previously recorded sequence number is still current
    /// (spec.md 4.5: "readers record the seq at acquisition and validate it
    /// remains unchanged before using cached pointers").
    pub fn validate_seq(&self, id: NodeId, recorded_seq: u32) -> Result<()> {
        let lock = self.lock_for(id);
        if lock.seq() != recorded_seq {
            return Err(Error::restart(RestartReason::MemRealloced));
        }
        Ok(())
    }

    pub fn release_read(&self, id: NodeId) {
        if let Some(lock) = self.locks.lock().get(&id).cloned() {
            lock.release_read();
        }
    }

    pub fn release_intent(&self, id: NodeId, tx: u64) {
        if let Some(lock) = self.locks.lock().get(&id).cloned() {
            lock.release_intent(tx);
        }
    }

    pub fn release_write(&self, id: NodeId, tx: u64) {
        if let Some(lock) = self.locks.lock().get(&id).cloned() {
            lock.release_write(tx);
        }
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pos: u64) -> OrderKey {
        OrderKey { btree_id: BtreeId::Inodes, level: 0, position: BPos::new(pos, 0, 0) }
    }

    #[test]
    fn out_of_order_acquisition_restarts() {
        let table = LockTable::new();
        let held = [key(10)];
        let err = table.try_acquire(NodeId(1), key(5), LockMode::Read, 1, &held).unwrap_err();
        assert!(matches!(err, Error::TransactionRestart(RestartReason::LockNodeReused, false)));
    }

    #[test]
    fn intent_then_write_upgrade_succeeds_without_readers() {
        let table = LockTable::new();
        table.try_acquire(NodeId(1), key(1), LockMode::Intent, 7, &[]).unwrap();
        table.try_acquire(NodeId(1), key(1), LockMode::Write, 7, &[key(1)]).unwrap();
        table.release_write(NodeId(1), 7);
    }

    #[test]
    fn write_upgrade_fails_while_reader_present() {
        let table = LockTable::new();
        table.try_acquire(NodeId(1), key(1), LockMode::Read, 1, &[]).unwrap();
        table.try_acquire(NodeId(1), key(1), LockMode::Intent, 2, &[]).unwrap();
        let err = table.try_acquire(NodeId(1), key(1), LockMode::Write, 2, &[key(1)]).unwrap_err();
        assert!(matches!(err, Error::TransactionRestart(RestartReason::RelockFail, false)));
    }

    #[test]
    fn write_release_bumps_seq_and_invalidates_stale_readers() {
        let table = LockTable::new();
        let seq0 = table.try_acquire(NodeId(1), key(1), LockMode::Intent, 1, &[]).unwrap();
        table.try_acquire(NodeId(1), key(1), LockMode::Write, 1, &[key(1)]).unwrap();
        table.release_write(NodeId(1), 1);
        assert!(table.validate_seq(NodeId(1), seq0).is_err());
    }

    #[test]
    fn restart_budget_bumps_after_threshold() {
        let mut budget = RestartBudget::default();
        assert!(!budget.record_restart("commit", 3));
        assert!(!budget.record_restart("commit", 3));
        assert!(budget.record_restart("commit", 3));
        budget.reset("commit");
        assert!(!budget.record_restart("commit", 3));
    }
}
