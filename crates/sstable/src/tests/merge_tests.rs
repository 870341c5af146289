use super::*;
use anyhow::Result;
use tempfile::tempdir;

fn vec_source(records: Vec<Record>) -> Box<dyn RecordSource + Send> {
    Box::new(VecSource::new(records))
}

fn collect(mut it: MergeIterator) -> Vec<Record> {
    let mut out = Vec::new();
    while let Some(r) = it.next_record().unwrap() {
        out.push(r);
    }
    out
}

// -------------------- MergeIterator --------------------

#[test]
fn merges_disjoint_sources_in_order() {
    let merged = collect(MergeIterator::new(vec![
        vec_source(vec![Record::put("a", "1", 1), Record::put("d", "1", 1)]),
        vec_source(vec![Record::put("b", "1", 1), Record::put("e", "1", 1)]),
        vec_source(vec![Record::put("c", "1", 1)]),
    ]));
    let keys: Vec<&[u8]> = merged.iter().map(|r| r.key.as_slice()).collect();
    assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c", b"d", b"e"]);
}

#[test]
fn highest_timestamp_wins_regardless_of_source_order() {
    for flip in [false, true] {
        let mut sources = vec![
            vec_source(vec![Record::put("k", "old", 1), Record::put("x", "x1", 5)]),
            vec_source(vec![Record::put("k", "new", 2), Record::put("x", "x0", 4)]),
        ];
        if flip {
            sources.reverse();
        }
        let merged = collect(MergeIterator::new(sources));
        assert_eq!(merged, vec![Record::put("k", "new", 2), Record::put("x", "x1", 5)]);
    }
}

#[test]
fn equal_timestamps_prefer_earlier_source() {
    let merged = collect(MergeIterator::new(vec![
        vec_source(vec![Record::put("k", "first", 3)]),
        vec_source(vec![Record::put("k", "second", 3)]),
    ]));
    assert_eq!(merged, vec![Record::put("k", "first", 3)]);
}

#[test]
fn tombstones_are_yielded() {
    let merged = collect(MergeIterator::new(vec![
        vec_source(vec![Record::put("k", "v", 1)]),
        vec_source(vec![Record::tombstone("k", 2)]),
    ]));
    assert_eq!(merged, vec![Record::tombstone("k", 2)]);
}

#[test]
fn empty_and_no_sources() {
    assert!(collect(MergeIterator::new(Vec::new())).is_empty());
    assert!(collect(MergeIterator::new(vec![vec_source(Vec::new())])).is_empty());
}

#[test]
fn iterator_impl_matches_next_record() {
    let it = MergeIterator::new(vec![
        vec_source(vec![Record::put("a", "1", 1)]),
        vec_source(vec![Record::put("a", "2", 2), Record::put("b", "1", 1)]),
    ]);
    let merged: Vec<Record> = it.collect::<crate::Result<_>>().unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].value, b"2");
}

#[test]
fn output_is_strictly_increasing() {
    let sources = (0..5u64)
        .map(|s| {
            vec_source(
                (0..100u64)
                    .filter(|i| i % (s + 1) == 0)
                    .map(|i| Record::put(format!("{:04}", i), "v", s))
                    .collect(),
            )
        })
        .collect();
    let merged = collect(MergeIterator::new(sources));
    assert_eq!(merged.len(), 100);
    assert!(merged.windows(2).all(|w| w[0].key < w[1].key));
}

// -------------------- Table merges --------------------

#[test]
fn merge_tables_keeps_newer_versions() -> Result<()> {
    let dir = tempdir()?;
    let old = build(
        dir.path(),
        1,
        &[Record::put("a", "a1", 1), Record::put("b", "b1", 1), Record::put("c", "c1", 1)],
        &TableOptions::default(),
    );
    let new = build(
        dir.path(),
        2,
        &[Record::put("b", "b2", 2), Record::tombstone("c", 2), Record::put("d", "d2", 2)],
        &TableOptions::default(),
    );

    for sources in [vec![old.clone(), new.clone()], vec![new.clone(), old.clone()]] {
        let writer = TableWriter::create(dir.path().join("out"), 10, 2, 6, TableOptions::default())?;
        let info = merge_tables(&sources, writer, |_| true)?;
        let merged = SSTable::open(&info.toc_path, &KeyCodec::Plain)?;
        assert_eq!(
            merged.records()?,
            vec![
                Record::put("a", "a1", 1),
                Record::put("b", "b2", 2),
                Record::tombstone("c", 2),
                Record::put("d", "d2", 2),
            ]
        );
        merged.delete_files()?;
    }
    Ok(())
}

#[test]
fn merge_tables_can_drop_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let a = build(dir.path(), 1, &[Record::put("k", "v", 1)], &TableOptions::default());
    let b = build(dir.path(), 2, &[Record::tombstone("k", 2)], &TableOptions::default());

    let writer = TableWriter::create(dir.path().join("out"), 3, 4, 2, TableOptions::default())?;
    let res = merge_tables(&[a, b], writer, |r| !r.tombstone);
    assert!(matches!(res, Err(SSTableError::Empty)));
    Ok(())
}

#[test]
fn equal_timestamps_across_tables_prefer_higher_label() -> Result<()> {
    let dir = tempdir()?;
    let a = build(dir.path(), 1, &[Record::put("k", "low", 5)], &TableOptions::default());
    let b = build(dir.path(), 2, &[Record::put("k", "high", 5)], &TableOptions::default());

    let merged = collect(MergeIterator::over_tables(&[a, b])?);
    assert_eq!(merged[0].value, b"high");
    Ok(())
}

#[test]
fn mixed_memory_and_table_sources() -> Result<()> {
    let dir = tempdir()?;
    let table = build(dir.path(), 1, &numbered(10, 1), &TableOptions::default());
    let merged = collect(MergeIterator::new(vec![
        vec_source(vec![Record::put("key00003", "fresh", 9)]),
        Box::new(table.cursor(None)?) as Box<dyn RecordSource + Send>,
    ]));
    assert_eq!(merged.len(), 10);
    assert_eq!(merged[3].value, b"fresh");
    Ok(())
}
