//! Scenario 1 (spec.md 8): create a key through a transaction, look it up
//! through an iterator, delete it with a tombstone, and confirm it is gone.

use driftfs_core::{
    BPos, Bkey, BkeyType, BtreeId, BtreeIter, BtreeTrans, Config, Crc32Checksum, Fs,
    InMemoryAllocator, InMemoryBlockDevice, SlotMode, SnapshotId, POS_MAX, POS_MIN,
};

fn make_fs() -> Fs {
    let config = Config::testing();
    let sb = driftfs_core::Superblock {
        fs_uuid: [0u8; 16],
        options: driftfs_core::superblock::Options {
            block_size: 4096,
            bucket_size: 65536,
            compression: driftfs_core::superblock::Compression::None,
            replicas: 1,
            str_hash: driftfs_core::superblock::StrHash::Crc32c,
        },
        members: Vec::new(),
        journal_buckets: driftfs_core::superblock::JournalBuckets::V1(Vec::new()),
        clean: driftfs_core::superblock::CleanSection::default(),
    };
    Fs::new(config, Box::new(InMemoryAllocator::new(1 << 30)), Box::new(InMemoryBlockDevice::new(4096)), Box::new(Crc32Checksum), sb)
}

#[test]
fn create_lookup_delete_round_trips() {
    let fs = make_fs();
    let pos = BPos::new(100, 0, 1);

    let mut tx = BtreeTrans::begin(&fs);
    tx.put(BtreeId::Inodes, Bkey::point(pos, BkeyType::InodeV3, 1, vec![1, 2, 3, 4])).unwrap();
    drop(tx);

    let mut it = BtreeIter::new(&fs, BtreeId::Inodes, POS_MIN, POS_MAX, SnapshotId(1), SlotMode::KeysOnly);
    let found = it.next().expect("inserted key should be visible");
    assert_eq!(found.position(), pos);
    assert_eq!(found.value, vec![1, 2, 3, 4]);
    assert!(it.next().is_none());

    let mut tx = BtreeTrans::begin(&fs);
    tx.put(BtreeId::Inodes, Bkey::tombstone(pos, 2)).unwrap();
    drop(tx);

    let mut it = BtreeIter::new(&fs, BtreeId::Inodes, POS_MIN, POS_MAX, SnapshotId(1), SlotMode::KeysOnly);
    assert!(it.next().is_none(), "tombstoned key must not surface in a KeysOnly iterator");

    let it = BtreeIter::new(&fs, BtreeId::Inodes, POS_MIN, POS_MAX, SnapshotId(1), SlotMode::Slots);
    let slot = it.peek_slot(pos).expect("slot mode always returns something for a covered position");
    assert!(slot.is_tombstone());
}
