//! Scenario 2 (spec.md 8): a rename expressed as two updates in one
//! transaction — tombstone the old dirent, insert the new one — commits as a
//! single unit; a reader never observes one without the other.

use driftfs_core::{
    BPos, Bkey, BkeyType, BtreeId, BtreeIter, BtreeTrans, Config, Crc32Checksum, Fs,
    InMemoryAllocator, InMemoryBlockDevice, SlotMode, SnapshotId, Superblock, POS_MAX, POS_MIN,
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

fn dirent_names(fs: &Fs) -> Vec<u64> {
    let mut it = BtreeIter::new(fs, BtreeId::Dirents, POS_MIN, POS_MAX, SnapshotId(1), SlotMode::KeysOnly);
    let mut out = Vec::new();
    while let Some(k) = it.next() {
        out.push(k.position().offset);
    }
    out.sort();
    out
}

#[test]
fn rename_moves_both_keys_in_one_commit() {
    let fs = make_fs();
    let old_pos = BPos::new(1, 10, 1);

    let mut tx = BtreeTrans::begin(&fs);
    tx.put(BtreeId::Dirents, Bkey::point(old_pos, BkeyType::Dirent, 1, b"old-name".to_vec())).unwrap();
    drop(tx);
    assert_eq!(dirent_names(&fs), vec![10]);

    let new_pos = BPos::new(1, 20, 1);
    let mut tx = BtreeTrans::begin(&fs);
    tx.update(BtreeId::Dirents, Bkey::tombstone(old_pos, 2));
    tx.update(BtreeId::Dirents, Bkey::point(new_pos, BkeyType::Dirent, 2, b"new-name".to_vec()));
    tx.commit(driftfs_core::CommitFlags::default()).unwrap();

    assert_eq!(dirent_names(&fs), vec![20], "old name must be gone and new name present after the rename commits");
}

#[test]
fn uncommitted_rename_leaves_old_name_untouched() {
    let fs = make_fs();
    let old_pos = BPos::new(1, 10, 1);
    let mut tx = BtreeTrans::begin(&fs);
    tx.put(BtreeId::Dirents, Bkey::point(old_pos, BkeyType::Dirent, 1, b"old-name".to_vec())).unwrap();
    drop(tx);

    {
        let mut tx = BtreeTrans::begin(&fs);
        tx.update(BtreeId::Dirents, Bkey::tombstone(old_pos, 2));
        tx.update(BtreeId::Dirents, Bkey::point(BPos::new(1, 20, 1), BkeyType::Dirent, 2, b"new-name".to_vec()));
        // Dropped without commit: the pending updates must never be applied.
    }

    assert_eq!(dirent_names(&fs), vec![10], "dropping a transaction before commit must not mutate the tree");
}
