use super::*;
use crate::format::{file_name, parse_toc_label, Component, TOC_DIR};
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn multi_file_layout() -> Result<()> {
    let dir = tempdir()?;
    let info = write_table(dir.path(), 3, 1, &numbered(10, 1), &TableOptions::default())?;

    assert_eq!(info.label, 3);
    assert_eq!(info.records, 10);
    assert_eq!(info.start_key, b"key00000");
    assert_eq!(info.end_key, b"key00009");
    assert_eq!(info.toc_path, dir.path().join(TOC_DIR).join("usertable-3-TOC.txt"));

    for component in [
        Component::Data,
        Component::Index,
        Component::Summary,
        Component::Filter,
        Component::Metadata,
    ] {
        assert!(dir.path().join(file_name(3, component)).exists(), "{:?}", component);
    }
    assert!(!dir.path().join(file_name(3, Component::Single)).exists());
    Ok(())
}

#[test]
fn single_file_layout() -> Result<()> {
    let dir = tempdir()?;
    let options = TableOptions {
        single_file: true,
        ..TableOptions::default()
    };
    let info = write_table(dir.path(), 1, 1, &numbered(25, 1), &options)?;

    let toc = Toc::parse(&fs::read_to_string(&info.toc_path)?, &info.toc_path)?;
    assert_eq!(toc.files(), vec!["usertable-1-SSTable.db", "usertable-1-Metadata.txt"]);
    assert_eq!(toc.index.offset, toc.data.size);
    assert_eq!(toc.summary.offset, toc.index.offset + toc.index.size);
    assert_eq!(toc.filter.offset, toc.summary.offset + toc.summary.size);

    let single = fs::metadata(dir.path().join("usertable-1-SSTable.db"))?.len();
    assert_eq!(single, toc.filter.offset + toc.filter.size);
    assert!(!dir.path().join(file_name(1, Component::Data)).exists());
    Ok(())
}

#[test]
fn index_samples_first_last_and_every_nth() -> Result<()> {
    let dir = tempdir()?;
    let options = TableOptions {
        index_degree: 4,
        summary_degree: 2,
        ..TableOptions::default()
    };
    // Records 0,4,8 sampled plus the last (9).
    write_table(dir.path(), 1, 1, &numbered(10, 1), &options)?;

    let index = fs::read(dir.path().join(file_name(1, Component::Index)))?;
    let entries = crate::format::decode_samples(&index, std::path::Path::new("i"), 0)?;
    let keys: Vec<String> = entries
        .iter()
        .map(|(k, _)| String::from_utf8(k.clone()).unwrap())
        .collect();
    assert_eq!(keys, vec!["key00000", "key00004", "key00008", "key00009"]);
    assert_eq!(entries[0].1, 0);

    let summary = fs::read(dir.path().join(file_name(1, Component::Summary)))?;
    let summary = crate::format::Summary::decode(&summary, std::path::Path::new("s"), 0)?;
    assert_eq!(summary.start_key, b"key00000");
    assert_eq!(summary.end_key, b"key00009");
    // Index entries 0 and 2.
    let sampled: Vec<&[u8]> = summary.samples.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(sampled, vec![b"key00000".as_slice(), b"key00008".as_slice()]);
    assert_eq!(summary.samples[0].1, 0);
    Ok(())
}

#[test]
fn metadata_counts_records_and_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let records = vec![
        Record::put("a", "1", 5),
        Record::tombstone("b", 9),
        Record::put("c", "3", 7),
    ];
    let info = write_table(dir.path(), 2, 3, &records, &TableOptions::default())?;
    let table = SSTable::open(&info.toc_path, &KeyCodec::Plain)?;

    let meta = table.metadata();
    assert_eq!(meta.label, 2);
    assert_eq!(meta.level, 3);
    assert_eq!(meta.records, 3);
    assert_eq!(meta.tombstones, 1);
    assert_eq!(meta.max_timestamp, 9);
    assert_eq!(meta.data_size, info.data_size);
    assert!(!meta.compressed);
    Ok(())
}

#[test]
fn empty_table_is_refused_and_leaves_nothing() -> Result<()> {
    let dir = tempdir()?;
    let res = write_table(dir.path(), 1, 1, &Vec::<Record>::new(), &TableOptions::default());
    assert!(matches!(res, Err(SSTableError::Empty)));

    assert!(!dir.path().join(file_name(1, Component::Data)).exists());
    assert_eq!(fs::read_dir(dir.path().join(TOC_DIR))?.count(), 0);
    Ok(())
}

#[test]
fn dropped_writer_removes_partial_files() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut writer = TableWriter::create(dir.path(), 4, 1, 10, TableOptions::default())?;
        writer.push(&Record::put("a", "1", 1))?;
        assert_eq!(writer.records(), 1);
        assert!(writer.data_size() > 0);
    }
    assert!(!dir.path().join(file_name(4, Component::Data)).exists());
    Ok(())
}

#[test]
fn toc_is_the_only_file_in_toc_dir() -> Result<()> {
    let dir = tempdir()?;
    write_table(dir.path(), 11, 1, &numbered(3, 1), &TableOptions::default())?;
    let names: Vec<String> = fs::read_dir(dir.path().join(TOC_DIR))?
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["usertable-11-TOC.txt".to_string()]);
    assert_eq!(parse_toc_label(&names[0]), Some(11));
    Ok(())
}
