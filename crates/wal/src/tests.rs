use super::*;
use config::WalConfig;
use std::fs;
use std::io::{Cursor, Write};
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn cfg(segment_size: u64, buffer_records: usize) -> WalConfig {
    WalConfig {
        segment_size,
        buffer_records,
        sync: false,
    }
}

fn replay_dir(dir: &std::path::Path) -> Result<Vec<(u64, Record)>, WalError> {
    let mut recs = Vec::new();
    Wal::replay(dir, |segment, r| recs.push((segment, r)))?;
    Ok(recs)
}

fn replay_from_bytes(data: &[u8]) -> Result<Vec<Record>, WalError> {
    let mut reader = WalReader::from_reader(Cursor::new(data.to_vec()));
    let mut recs = Vec::new();
    reader.replay(|r| recs.push(r))?;
    Ok(recs)
}

fn encode(records: &[Record]) -> Vec<u8> {
    let mut buf = Vec::new();
    for r in records {
        encode_record(r, &mut buf);
    }
    buf
}

// -------------------- Basic write & replay --------------------

#[test]
fn write_and_replay_put_and_delete() {
    let dir = tempdir().unwrap();
    {
        let mut wal = Wal::open(dir.path(), &WalConfig::default()).unwrap();
        wal.put_commit(b"k", b"v1", 1).unwrap();
        wal.put_commit(b"k2", b"v2", 2).unwrap();
        wal.delete_commit(b"k", b"", 3).unwrap();
    }

    let recs: Vec<Record> = replay_dir(dir.path())
        .unwrap()
        .into_iter()
        .map(|(_, r)| r)
        .collect();
    assert_eq!(
        recs,
        vec![
            Record::put("k", "v1", 1),
            Record::put("k2", "v2", 2),
            Record::tombstone("k", 3),
        ]
    );
}

#[test]
fn empty_value_and_binary_key_survive() {
    let bytes = encode(&[Record::put(vec![0u8, 255, 10], "", 7)]);
    assert_eq!(bytes.len(), RECORD_HEADER_BYTES + 3);

    let recs = replay_from_bytes(&bytes).unwrap();
    assert_eq!(recs, vec![Record::put(vec![0u8, 255, 10], "", 7)]);
}

#[test]
fn empty_stream_replays_nothing() {
    assert!(replay_from_bytes(&[]).unwrap().is_empty());
}

#[test]
fn replay_of_missing_directory_is_empty() {
    let dir = tempdir().unwrap();
    assert!(replay_dir(&dir.path().join("nope")).unwrap().is_empty());
}

// -------------------- Segments --------------------

#[test]
fn each_open_starts_a_new_segment() {
    let dir = tempdir().unwrap();
    {
        let mut wal = Wal::open(dir.path(), &WalConfig::default()).unwrap();
        assert_eq!(wal.current_segment(), 0);
        wal.put_commit(b"a", b"1", 1).unwrap();
    }
    {
        let mut wal = Wal::open(dir.path(), &WalConfig::default()).unwrap();
        assert_eq!(wal.current_segment(), 1);
        wal.put_commit(b"b", b"2", 2).unwrap();
    }

    let recs = replay_dir(dir.path()).unwrap();
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[0].0, 0);
    assert_eq!(recs[1].0, 1);
}

#[test]
fn segments_rotate_without_splitting_records() {
    let dir = tempdir().unwrap();
    let rec_len = encoded_len(&Record::put("key00", "value", 0));
    // Room for two records per segment, not three.
    let mut wal = Wal::open(dir.path(), &cfg(rec_len * 2 + 1, 1)).unwrap();
    for i in 0..5u64 {
        wal.put_commit(format!("key{:02}", i).as_bytes(), b"value", i).unwrap();
    }
    assert_eq!(wal.current_segment(), 2);
    drop(wal);

    let segments = Wal::segments(dir.path()).unwrap();
    assert_eq!(segments.len(), 3);
    for (_, path) in &segments[..2] {
        assert_eq!(fs::metadata(path).unwrap().len(), rec_len * 2);
    }

    let recs = replay_dir(dir.path()).unwrap();
    let order: Vec<u64> = recs.iter().map(|(_, r)| r.timestamp).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    let segs: Vec<u64> = recs.iter().map(|(s, _)| *s).collect();
    assert_eq!(segs, vec![0, 0, 1, 1, 2]);
}

#[test]
fn oversized_record_gets_its_own_segment() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path(), &cfg(64, 1)).unwrap();
    wal.put_commit(b"small", b"x", 1).unwrap();
    wal.put_commit(b"big", &[7u8; 500], 2).unwrap();
    wal.put_commit(b"after", b"y", 3).unwrap();
    drop(wal);

    let recs = replay_dir(dir.path()).unwrap();
    let segs: Vec<u64> = recs.iter().map(|(s, _)| *s).collect();
    assert_eq!(segs, vec![0, 1, 2]);
    assert_eq!(recs[1].1.value.len(), 500);
}

#[test]
fn purge_removes_older_segments_only() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path(), &cfg(1, 1)).unwrap();
    for i in 0..4u64 {
        wal.put_commit(b"k", b"v", i).unwrap();
    }
    assert_eq!(wal.current_segment(), 3);

    assert_eq!(wal.purge_segments_before(2).unwrap(), 2);
    let left: Vec<u64> = Wal::segments(dir.path())
        .unwrap()
        .into_iter()
        .map(|(i, _)| i)
        .collect();
    assert_eq!(left, vec![2, 3]);

    // Never past the active segment.
    assert_eq!(wal.purge_segments_before(u64::MAX).unwrap(), 1);
    assert_eq!(Wal::segments(dir.path()).unwrap().len(), 1);
}

#[test]
fn roll_skips_empty_segment() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path(), &cfg(1024, 4)).unwrap();
    assert_eq!(wal.roll().unwrap(), 0);

    // Buffered records are written before the segment is left behind.
    wal.put_commit(b"k", b"v", 1).unwrap();
    assert_eq!(wal.roll().unwrap(), 1);
    assert_eq!(wal.purge_segments_before(1).unwrap(), 1);
    assert!(replay_dir(dir.path()).unwrap().is_empty());
}

#[test]
fn unrelated_files_are_ignored() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
    fs::write(dir.path().join("wal_abc.log"), b"junk").unwrap();
    let wal = Wal::open(dir.path(), &WalConfig::default()).unwrap();
    assert_eq!(wal.current_segment(), 0);
}

// -------------------- Buffering --------------------

#[test]
fn buffered_records_reach_disk_when_buffer_fills() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path(), &cfg(1 << 20, 3)).unwrap();
    wal.put_commit(b"a", b"1", 1).unwrap();
    wal.put_commit(b"b", b"2", 2).unwrap();
    assert!(replay_dir(dir.path()).unwrap().is_empty());

    wal.put_commit(b"c", b"3", 3).unwrap();
    assert_eq!(replay_dir(dir.path()).unwrap().len(), 3);
}

#[test]
fn sync_and_drop_flush_partial_buffer() {
    let dir = tempdir().unwrap();
    {
        let mut wal = Wal::open(dir.path(), &cfg(1 << 20, 10)).unwrap();
        wal.put_commit(b"a", b"1", 1).unwrap();
        wal.sync().unwrap();
        assert_eq!(replay_dir(dir.path()).unwrap().len(), 1);
        wal.put_commit(b"b", b"2", 2).unwrap();
    }
    assert_eq!(replay_dir(dir.path()).unwrap().len(), 2);
}

// -------------------- Corruption & truncation --------------------

#[test]
fn torn_write_is_cut_before_next_append() {
    let dir = tempdir().unwrap();
    let mut wal = Wal::open(dir.path(), &cfg(1 << 20, 1)).unwrap();
    wal.put_commit(b"a", b"1", 1).unwrap();
    wal.put_commit(b"b", b"2", 2).unwrap();

    // Half of a record lands on disk before the write fails.
    let torn = encode(&[Record::put("c", "3", 3)]);
    let (_, path) = Wal::segments(dir.path()).unwrap().pop().unwrap();
    fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap()
        .write_all(&torn[..torn.len() / 2])
        .unwrap();
    wal.discard_torn_write();

    wal.put_commit(b"d", b"4", 4).unwrap();
    let keys: Vec<Vec<u8>> = replay_dir(dir.path())
        .unwrap()
        .into_iter()
        .map(|(_, r)| r.key)
        .collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"d".to_vec()]);
}

#[test]
fn truncated_tail_is_clean_end() {
    let mut bytes = encode(&[Record::put("a", "1", 1), Record::put("b", "2", 2)]);
    bytes.truncate(bytes.len() - 3);

    let mut reader = WalReader::from_reader(Cursor::new(bytes));
    let mut recs = Vec::new();
    let clean = reader.replay(|r| recs.push(r)).unwrap();
    assert!(!clean);
    assert_eq!(recs, vec![Record::put("a", "1", 1)]);
}

#[test]
fn truncated_header_is_clean_end() {
    let mut bytes = encode(&[Record::put("a", "1", 1)]);
    bytes.extend_from_slice(&[1, 2, 3, 4, 5]);
    assert_eq!(replay_from_bytes(&bytes).unwrap().len(), 1);
}

#[test]
fn crc_mismatch_is_corrupt() {
    let mut bytes = encode(&[Record::put("a", "1", 1), Record::put("b", "2", 2)]);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    match replay_from_bytes(&bytes) {
        Err(WalError::Corrupt { offset }) => {
            assert_eq!(offset, encoded_len(&Record::put("a", "1", 1)));
        }
        other => panic!("expected Corrupt, got {:?}", other),
    }
}

#[test]
fn absurd_length_is_corrupt() {
    let mut bytes = encode(&[Record::put("a", "1", 1)]);
    // key_len field follows crc(4) + ts(8) + tombstone(1).
    bytes[13..21].copy_from_slice(&u64::MAX.to_le_bytes());
    assert!(matches!(
        replay_from_bytes(&bytes),
        Err(WalError::Corrupt { offset: 0 })
    ));
}

#[test]
fn corrupt_segment_fails_directory_replay() {
    let dir = tempdir().unwrap();
    {
        let mut wal = Wal::open(dir.path(), &WalConfig::default()).unwrap();
        wal.put_commit(b"a", b"1", 1).unwrap();
    }
    let (_, path) = Wal::segments(dir.path()).unwrap().remove(0);
    let mut bytes = fs::read(&path).unwrap();
    bytes[5] ^= 0x01;
    fs::write(&path, bytes).unwrap();

    assert!(matches!(
        replay_dir(dir.path()),
        Err(WalError::Corrupt { .. })
    ));
}

#[test]
fn open_nonexistent_file_is_io_error() {
    let dir = tempdir().unwrap();
    let res = WalReader::open(dir.path().join("missing.log"));
    assert!(matches!(res, Err(WalError::Io(_))));
}
