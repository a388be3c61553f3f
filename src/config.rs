//! Engine configuration and named presets.
//!
//! Grounded on `src/db/config.rs`'s `SyncMode` + `Config::{production,
//! balanced, benchmark, fully_durable}` pattern: a flat options struct with
//! a handful of fully-specified preset constructors rather than a builder.

use serde::{Deserialize, Serialize};

/// Durability policy for journal writes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FsyncPolicy {
    /// Every commit's jset is written `flush` (device cache flush + FUA).
    Full,
    /// Jsets are `noflush` by default; `fsync(seq)` forces a flush on demand.
    Normal,
    /// Batch several commits' jsets behind one flush (group commit).
    GroupCommit,
    /// No flush at all; only for throwaway/benchmark instances.
    Off,
}

/// Engine-wide configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Durability policy applied to journal writes.
    pub fsync_policy: FsyncPolicy,
    /// Maximum resident nodes held by the node cache.
    pub node_cache_size: usize,
    /// Verify bset checksums on every node read-in, not just on suspicion.
    pub checksum_verify_on_read: bool,
    /// Number of bsets a node may accumulate before a background sort-merge.
    pub bset_compact_threshold: usize,
    /// Fraction (0-100) of journal capacity usable by outstanding reservations.
    pub journal_reservation_pct: u8,
    /// Soft limit on paths per transaction before `too_many_iters`.
    pub max_paths_soft: usize,
    /// Hard limit on paths per transaction before `too_many_iters`.
    pub max_paths_hard: usize,
    /// Consecutive restarts of one call-site before a fairness priority bump.
    pub restart_backoff_threshold: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fsync_policy: FsyncPolicy::Normal,
            node_cache_size: 1024,
            checksum_verify_on_read: true,
            bset_compact_threshold: 3,
            journal_reservation_pct: 80,
            max_paths_soft: 64,
            max_paths_hard: 96,
            restart_backoff_threshold: 8,
        }
    }
}

impl Config {
    /// Conservative preset: every commit is durable before it returns.
    pub fn fully_durable() -> Self {
        Self {
            fsync_policy: FsyncPolicy::Full,
            checksum_verify_on_read: true,
            journal_reservation_pct: 60,
            ..Self::default()
        }
    }

    /// Balanced preset: group-commit journal writes, moderate cache.
    pub fn balanced() -> Self {
        Self {
            fsync_policy: FsyncPolicy::GroupCommit,
            node_cache_size: 2048,
            ..Self::default()
        }
    }

    /// Throughput-oriented preset for bulk load / benchmarking.
    pub fn benchmark() -> Self {
        Self {
            fsync_policy: FsyncPolicy::Off,
            checksum_verify_on_read: false,
            node_cache_size: 4096,
            journal_reservation_pct: 95,
            ..Self::default()
        }
    }

    /// Small-footprint preset used by the integration tests in `tests/`.
    pub fn testing() -> Self {
        Self {
            node_cache_size: 32,
            bset_compact_threshold: 2,
            max_paths_soft: 8,
            max_paths_hard: 12,
            ..Self::default()
        }
    }
}
