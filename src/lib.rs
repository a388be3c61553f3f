//! # driftfs-core - B+tree transaction engine for a copy-on-write filesystem
//!
//! `driftfs-core` is the in-memory reference implementation of a bcachefs-
//! style transactional B+tree: ordered keys, a write-ahead journal with a
//! reservation protocol, six-state per-node locking with restart-not-block
//! semantics, a snapshot keyspace overlay, and a pluggable allocator and
//! block device.
//!
//! ## Quick Start
//!
//! ```rust
//! use driftfs_core::{BPos, Bkey, BkeyType, BtreeId, BtreeTrans, Fs};
//!
//! # fn run(fs: &Fs) -> driftfs_core::Result<()> {
//! let mut tx = BtreeTrans::begin(fs);
//! let key = Bkey::point(BPos::new(5, 0, 0), BkeyType::InodeV3, 1, vec![0; 4]);
//! tx.put(BtreeId::Inodes, key)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Keyspace**: [`bpos`]/[`bkey`] define the ordered key and its typed
//!   payload; [`bset`] packs runs of keys into a sorted, indexed buffer.
//! - **Nodes**: [`node`] holds the on-disk node representation and its
//!   in-memory cache; [`fs`] descends and splits them into a full B+tree.
//! - **Durability**: [`journal`] is the write-ahead log; [`alloc`] reserves
//!   disk space; [`superblock`] is the fixed on-disk root record;
//!   [`codec`] abstracts checksums and compression.
//! - **Concurrency**: [`lock`] is the per-node lock table; [`path`] tracks
//!   per-level lock state; [`snapshot`] is the snapshot ancestry overlay.
//! - **Transactions**: [`trans`] and [`commit`] implement the path/update/
//!   commit lifecycle; [`iter`] layers read cursors and a write-back cache
//!   on top.

pub mod alloc;
pub mod bkey;
pub mod block;
pub mod bpos;
pub mod bset;
pub mod codec;
pub mod commit;
pub mod config;
pub mod error;
pub mod fs;
pub mod iter;
pub mod journal;
pub mod lock;
pub mod node;
pub mod path;
pub mod snapshot;
pub mod superblock;
pub mod trans;

pub use crate::alloc::{Allocator, InMemoryAllocator, ReservationFlags};
pub use crate::bkey::{Bkey, BkeyHeader, BkeyType, BtreeId};
pub use crate::block::{BlockDevice, InMemoryBlockDevice};
pub use crate::bpos::{BPos, POS_MAX, POS_MIN};
pub use crate::bset::{Bset, MergingIter, PackFormat};
pub use crate::codec::{Checksum, Compressor, Crc32Checksum};
pub use crate::config::{Config, FsyncPolicy};
pub use crate::error::{Error, Result, RestartReason};
pub use crate::fs::Fs;
pub use crate::iter::{BtreeIter, KeyCache, SlotMode};
pub use crate::journal::{FlushKind, Journal, JournalEntry};
pub use crate::lock::{LockMode, LockTable, OrderKey, RestartBudget};
pub use crate::node::{BtreeNode, NodeCache, NodeId};
pub use crate::path::{Path, PathLevel};
pub use crate::snapshot::{SnapshotId, SnapshotNode, SnapshotTable};
pub use crate::superblock::Superblock;
pub use crate::trans::{BtreeTrans, CommitFlags, PathFlags, PendingUpdate};
