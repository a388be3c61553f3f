//! Scenario 4 (spec.md 8): a value written against the root snapshot is
//! visible through descendant snapshots until a descendant overrides it with
//! its own version; sibling branches never see each other's writes.

use driftfs_core::{
    BPos, Bkey, BkeyType, BtreeId, BtreeIter, Config, Crc32Checksum, Fs, InMemoryAllocator,
    InMemoryBlockDevice, SlotMode, SnapshotId, Superblock, POS_MAX, POS_MIN,
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

fn value_visible_at(fs: &Fs, snapshot: SnapshotId) -> Option<Vec<u8>> {
    let mut it = BtreeIter::new(fs, BtreeId::Xattrs, POS_MIN, POS_MAX, snapshot, SlotMode::KeysOnly);
    it.next().map(|k| k.value)
}

#[test]
fn descendant_inherits_ancestor_write_until_it_overrides() {
    let fs = make_fs();
    fs.snapshots.create_child(SnapshotId(1), SnapshotId(2)).unwrap();
    fs.snapshots.create_child(SnapshotId(2), SnapshotId(3)).unwrap();

    let pos_root = BPos::new(1, 0, 1);
    fs.insert_key(BtreeId::Xattrs, Bkey::point(pos_root, BkeyType::Xattr, 1, b"root-value".to_vec()), 32).unwrap();

    assert_eq!(value_visible_at(&fs, SnapshotId(2)), Some(b"root-value".to_vec()));
    assert_eq!(value_visible_at(&fs, SnapshotId(3)), Some(b"root-value".to_vec()));

    let pos_child = BPos::new(1, 0, 3);
    fs.insert_key(BtreeId::Xattrs, Bkey::point(pos_child, BkeyType::Xattr, 2, b"child-value".to_vec()), 32).unwrap();

    assert_eq!(value_visible_at(&fs, SnapshotId(3)), Some(b"child-value".to_vec()), "the snapshot that wrote its own version must see it, not the ancestor's");
    assert_eq!(value_visible_at(&fs, SnapshotId(2)), Some(b"root-value".to_vec()), "a sibling branch of the overriding snapshot must keep seeing the ancestor's version");
}

#[test]
fn sibling_branches_never_see_each_others_writes() {
    let fs = make_fs();
    fs.snapshots.create_child(SnapshotId(1), SnapshotId(2)).unwrap();
    fs.snapshots.create_child(SnapshotId(1), SnapshotId(3)).unwrap();

    let pos = BPos::new(5, 0, 2);
    fs.insert_key(BtreeId::Xattrs, Bkey::point(pos, BkeyType::Xattr, 1, b"only-on-2".to_vec()), 32).unwrap();

    assert_eq!(value_visible_at(&fs, SnapshotId(2)), Some(b"only-on-2".to_vec()));
    assert_eq!(value_visible_at(&fs, SnapshotId(3)), None, "a sibling snapshot must not see a write made only on snapshot 2");
}
