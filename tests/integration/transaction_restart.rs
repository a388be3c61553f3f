//! Scenario 3 (spec.md 8): two transactions contend for intent locks on the
//! same leaf; the second is told to restart rather than block, and the
//! per-call-site fairness budget eventually trips after repeated restarts.

use driftfs_core::{
    BPos, BtreeId, BtreeTrans, Config, Crc32Checksum, Error, Fs, InMemoryAllocator,
    InMemoryBlockDevice, PathFlags, Superblock,
};
use driftfs_core::superblock::{CleanSection, Compression, JournalBuckets, Options, StrHash};

fn make_fs() -> Fs {
    let sb = Superblock {
        fs_uuid: [0u8; 16],
        options: Options { block_size: 4096, bucket_size: 65536, compression: Compression::None, replicas: 1, str_hash: StrHash::Crc32c },
        members: Vec::new(),
        journal_buckets: JournalBuckets::V1(Vec::new()),
        clean: CleanSection::default(),
    };
    Fs::new(Config::testing(), Box::new(InMemoryAllocator::new(1 << 30)), Box::new(InMemoryBlockDevice::new(4096)), Box::new(Crc32Checksum), sb)
}

#[test]
fn contending_intent_acquisitions_restart_instead_of_blocking() {
    let fs = make_fs();
    let pos = BPos::new(1, 0, 0);

    let mut tx1 = BtreeTrans::begin(&fs);
    tx1.path_get(BtreeId::Inodes, pos, PathFlags { intent: true, cached: false }).unwrap();

    let mut tx2 = BtreeTrans::begin(&fs);
    let err = tx2.path_get(BtreeId::Inodes, pos, PathFlags { intent: true, cached: false }).unwrap_err();
    assert!(err.is_restart(), "second transaction must restart rather than block on a held intent lock");
    assert!(matches!(err, Error::TransactionRestart(_, _)));
}

#[test]
fn repeated_restarts_trip_the_fairness_budget() {
    let fs = make_fs();
    let mut tx = BtreeTrans::begin(&fs);
    let threshold = fs.config.restart_backoff_threshold;
    let mut tripped = false;
    for _ in 0..threshold {
        tripped = tx.note_restart("path_get");
    }
    assert!(tripped, "fairness budget should trip once a call-site restarts `restart_backoff_threshold` times in a row");
    assert_eq!(tx.restart_count(), threshold);
}

#[test]
fn released_intent_lock_allows_the_next_transaction_through() {
    let fs = make_fs();
    let pos = BPos::new(1, 0, 0);

    {
        let mut tx1 = BtreeTrans::begin(&fs);
        tx1.path_get(BtreeId::Inodes, pos, PathFlags { intent: true, cached: false }).unwrap();
        // tx1 dropped here, releasing its intent lock.
    }

    let mut tx2 = BtreeTrans::begin(&fs);
    assert!(tx2.path_get(BtreeId::Inodes, pos, PathFlags { intent: true, cached: false }).is_ok());
}
