//! Crate-wide error type.
//!
//! Mirrors the teacher's split between a rich, structured enum for
//! programmer-facing failures (`GraphError`) and the minimal newtype style
//! of `sombra-types::SombraError`: one `thiserror`-derived enum, one
//! `Result<T>` alias, no stringly-typed catch-all.

use std::fmt;
use std::io;

use parking_lot::Mutex;

/// Sub-kind of a `transaction_restart`, used for instrumentation and fault
/// injection (spec.md 4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RestartReason {
    /// A node referenced by a path was evicted and replaced before use.
    LockNodeReused,
    /// An intent or write acquisition would have blocked.
    RelockFail,
    /// Blocked waiting on journal space to be reclaimed.
    JournalReclaim,
    /// A path's scratch memory was reallocated underneath it.
    MemRealloced,
    /// Catch-all for restart causes not covered by the named sub-kinds.
    Other(&'static str),
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::LockNodeReused => write!(f, "lock_node_reused"),
            RestartReason::RelockFail => write!(f, "relock_fail"),
            RestartReason::JournalReclaim => write!(f, "journal_reclaim"),
            RestartReason::MemRealloced => write!(f, "mem_realloced"),
            RestartReason::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Expected control-flow signal: the caller's retry loop must discard
    /// pending updates, release locks, and call `begin()` again.
    #[error("transaction restart: {0}{}", if *.1 { " (nested)" } else { "" })]
    TransactionRestart(RestartReason, bool),
    /// The allocator could not satisfy a reservation.
    #[error("no space available")]
    NoSpace,
    /// I/O failure from the block layer or underlying file.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// A checksum, ordering, or structural invariant was violated.
    #[error("fatal corruption: {0}")]
    FatalCorruption(String),
    /// A requested on-disk feature is not implemented by this build.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
    /// Normal not-found signal; callers should not log this as an error.
    #[error("not found")]
    Enoent,
    /// Normal already-exists signal; callers should not log this as an error.
    #[error("already exists")]
    Eexist,
    /// A key was read back as a type incompatible with the expected one.
    #[error("bkey type mismatch")]
    BkeyTypeMismatch,
    /// A configuration option requires an already-open filesystem handle.
    #[error("option requires an open filesystem: {0}")]
    OptionNeedsOpenFs(&'static str),
    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Too many paths open on one transaction (spec.md 4.6 hard limit).
    #[error("too many iterators open on transaction")]
    TooManyIters,
}

impl Error {
    /// Build a `transaction_restart` error for a top-level transaction.
    pub fn restart(reason: RestartReason) -> Self {
        Error::TransactionRestart(reason, false)
    }

    /// Build a `transaction_restart_nested` error (spec.md 4.5).
    pub fn restart_nested(reason: RestartReason) -> Self {
        Error::TransactionRestart(reason, true)
    }

    /// True if this error is a restart that the caller's loop should retry.
    pub fn is_restart(&self) -> bool {
        matches!(self, Error::TransactionRestart(..))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts a poisoned-mutex error into `fatal_corruption`, logging first.
///
/// Grounded on `src/error.rs::acquire_lock` in the teacher: a poisoned
/// internal lock means a prior panic left shared state inconsistent, which
/// for this engine is equivalent to on-disk corruption of process state.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> parking_lot::MutexGuard<'_, T> {
    // parking_lot mutexes do not poison; kept as a single acquisition point
    // so call sites read the same way the teacher's poison-aware helper does.
    mutex.lock()
}
