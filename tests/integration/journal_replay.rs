//! Scenario 5 (spec.md 8): commit a run of jsets, then replay the serialized
//! log — corruption partway through must stop replay at the last good
//! record, and a blacklisted seq must be skipped without halting it.

use driftfs_core::{Crc32Checksum, FlushKind, Journal, JournalEntry};

#[test]
fn replay_applies_every_jset_when_nothing_is_corrupted() {
    let journal = Journal::new(1000, Box::new(Crc32Checksum));
    for seq in 1..=5u64 {
        let r = journal.try_reserve(1).unwrap();
        assert_eq!(r.seq, seq);
        journal.commit_reservation(r, vec![JournalEntry::Clock { io_time: seq }], FlushKind::Noflush);
    }

    let bytes = journal.to_bytes();
    let checksum = Crc32Checksum;
    let mut seen = Vec::new();
    let report = journal.replay(&bytes, &[], &checksum, |seq, _| seen.push(seq));

    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(report.applied, 5);
    assert!(report.stopped_at.is_none());
}

#[test]
fn replay_stops_at_the_first_corrupted_record() {
    let journal = Journal::new(1000, Box::new(Crc32Checksum));
    for seq in 1..=5u64 {
        let r = journal.try_reserve(1).unwrap();
        journal.commit_reservation(r, vec![JournalEntry::Clock { io_time: seq }], FlushKind::Noflush);
    }

    let mut bytes = journal.to_bytes();
    // Flip a byte inside the last record's body; its checksum no longer matches.
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;

    let checksum = Crc32Checksum;
    let mut seen = Vec::new();
    let report = journal.replay(&bytes, &[], &checksum, |seq, _| seen.push(seq));

    assert_eq!(seen, vec![1, 2, 3, 4], "every jset before the corrupted one must still have been applied");
    assert_eq!(report.stopped_at, Some(5));
}

#[test]
fn blacklisted_seq_is_skipped_without_halting_replay() {
    let journal = Journal::new(1000, Box::new(Crc32Checksum));
    for seq in 1..=5u64 {
        let r = journal.try_reserve(1).unwrap();
        journal.commit_reservation(r, vec![JournalEntry::Clock { io_time: seq }], FlushKind::Noflush);
    }

    let bytes = journal.to_bytes();
    let checksum = Crc32Checksum;
    let mut seen = Vec::new();
    let report = journal.replay(&bytes, &[3..4], &checksum, |seq, _| seen.push(seq));

    assert_eq!(seen, vec![1, 2, 4, 5], "a blacklisted seq must be skipped, not applied, but must not stop replay");
    assert_eq!(report.applied, 4);
    assert!(report.stopped_at.is_none());
}
