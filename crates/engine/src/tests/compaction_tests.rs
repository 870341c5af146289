use super::*;
use anyhow::Result;
use tempfile::tempdir;

fn size_tiered(dir: &Path, max_level: usize, max_tables: usize) -> EngineConfig {
    let mut config = small_config(dir);
    config.compaction.strategy = CompactionStrategy::SizeTiered;
    config.compaction.max_level = max_level;
    config.compaction.max_tables_per_level = max_tables;
    config
}

fn leveled(dir: &Path) -> EngineConfig {
    let mut config = small_config(dir);
    config.compaction.strategy = CompactionStrategy::Leveled;
    config.compaction.max_level = 3;
    config.compaction.max_tables_per_level = 2;
    config.compaction.first_level_size = 400;
    config.compaction.fanout = 4;
    config.compaction.target_table_size = 150;
    config
}

/// Asserts that tables of `level` are ordered by start key with disjoint
/// ranges.
fn assert_disjoint(engine: &Engine, level: usize) {
    let levels = engine.levels.read();
    for pair in levels.level(level).windows(2) {
        assert!(
            pair[0].end_key() < pair[1].start_key(),
            "level {} overlaps: {:?}..{:?} / {:?}..{:?}",
            level,
            String::from_utf8_lossy(pair[0].start_key()),
            String::from_utf8_lossy(pair[0].end_key()),
            String::from_utf8_lossy(pair[1].start_key()),
            String::from_utf8_lossy(pair[1].end_key()),
        );
    }
}

// --------------------- Size-tiered ---------------------

#[test]
fn failed_compaction_does_not_fail_the_flush() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 3, 2))?;
    let blocker = levels::level_dir(dir.path(), 2);
    fs::write(&blocker, b"")?;

    write_round(&engine, 0..4, 1)?;
    write_round(&engine, 4..8, 1)?;
    assert_eq!(engine.level_table_counts(), vec![2, 0, 0]);
    engine.put(&key(8), b"late")?;
    for i in 0..8 {
        assert_eq!(engine.get(&key(i))?, Some(format!("{}@1", key(i)).into_bytes()));
    }
    assert!(engine.compact().is_err());

    fs::remove_file(&blocker)?;
    engine.compact()?;
    assert_eq!(engine.level_table_counts(), vec![0, 1, 0]);
    assert_eq!(engine.get(&key(8))?, Some(b"late".to_vec()));
    Ok(())
}

#[test]
fn size_tiered_folds_full_level() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 3, 3))?;

    write_round(&engine, 0..4, 1)?;
    write_round(&engine, 4..8, 1)?;
    assert_eq!(engine.level_table_counts(), vec![2, 0, 0]);

    write_round(&engine, 8..12, 1)?;
    assert_eq!(engine.level_table_counts(), vec![0, 1, 0]);
    assert_eq!(engine.levels.read().level(2)[0].len(), 12);

    for i in 0..12 {
        assert_eq!(engine.get(&key(i))?, Some(format!("{}@1", key(i)).into_bytes()));
    }
    Ok(())
}

#[test]
fn size_tiered_cascades_to_deeper_levels() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 3, 3))?;

    for round in 0..9 {
        write_round(&engine, round * 2..round * 2 + 2, round)?;
    }
    assert_eq!(engine.level_table_counts(), vec![0, 0, 1]);
    for i in 0..18 {
        assert_eq!(engine.get(&key(i))?, Some(format!("{}@{}", key(i), i / 2).into_bytes()));
    }
    Ok(())
}

#[test]
fn size_tiered_keeps_levels_below_limit() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 4, 3))?;

    for i in 0..300 {
        engine.put(&key(i % 97), format!("{}", i).as_bytes())?;
        let counts = engine.level_table_counts();
        assert!(counts[..3].iter().all(|c| *c < 3), "{:?}", counts);
    }
    for i in 203..300 {
        assert_eq!(engine.get(&key(i % 97))?, Some(format!("{}", i).into_bytes()));
    }
    Ok(())
}

#[test]
fn merge_keeps_newest_version() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 3, 3))?;

    write_round(&engine, 0..4, 1)?;
    write_round(&engine, 0..4, 2)?;
    write_round(&engine, 2..4, 3)?;

    let table = engine.levels.read().level(2)[0].clone();
    let values: Vec<Vec<u8>> = table.records()?.into_iter().map(|r| r.value).collect();
    assert_eq!(
        values,
        vec![
            format!("{}@2", key(0)).into_bytes(),
            format!("{}@2", key(1)).into_bytes(),
            format!("{}@3", key(2)).into_bytes(),
            format!("{}@3", key(3)).into_bytes(),
        ]
    );
    Ok(())
}

#[test]
fn compaction_deletes_source_files() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 3, 2))?;

    write_round(&engine, 0..4, 1)?;
    assert!(!table_files(dir.path(), 1).is_empty());
    write_round(&engine, 4..8, 1)?;

    assert!(table_files(dir.path(), 1).is_empty());
    assert!(!table_files(dir.path(), 2).is_empty());
    Ok(())
}

// --------------------- Tombstones ---------------------

#[test]
fn tombstones_dropped_at_last_level() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 2, 2))?;

    write_round(&engine, 0..1, 1)?;
    engine.delete(&key(0))?;
    engine.flush()?;

    // Nothing survives the merge, so no output table is written.
    assert_eq!(engine.level_table_counts(), vec![0, 0]);
    assert!(table_files(dir.path(), 2).is_empty());
    assert_eq!(engine.get(&key(0))?, None);
    Ok(())
}

#[test]
fn tombstones_kept_above_last_level() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 3, 2))?;

    write_round(&engine, 0..1, 1)?;
    engine.delete(&key(0))?;
    engine.flush()?;

    assert_eq!(engine.level_table_counts(), vec![0, 1, 0]);
    let table = engine.levels.read().level(2)[0].clone();
    assert_eq!(table.metadata().tombstones, 1);
    assert_eq!(engine.get(&key(0))?, None);
    Ok(())
}

#[test]
fn tombstones_kept_while_target_level_covers_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(size_tiered(dir.path(), 2, 2))?;

    write_round(&engine, 0..1, 1)?;
    write_round(&engine, 4..5, 1)?;
    assert_eq!(engine.level_table_counts(), vec![0, 1]);

    // key(2) falls inside the surviving level-2 table's range.
    write_round(&engine, 2..3, 1)?;
    engine.delete(&key(2))?;
    engine.flush()?;

    assert_eq!(engine.level_table_counts(), vec![0, 2]);
    let tombstones: u64 = engine
        .levels
        .read()
        .level(2)
        .iter()
        .map(|t| t.metadata().tombstones)
        .sum();
    assert_eq!(tombstones, 1);
    assert_eq!(engine.get(&key(2))?, None);
    Ok(())
}

// --------------------- Leveled ---------------------

#[test]
fn leveled_respects_level_bounds() -> Result<()> {
    let dir = tempdir()?;
    let config = leveled(dir.path());
    let limit = config.level_size_limit(2).unwrap();
    let engine = Engine::open(config)?;

    for round in 0..12 {
        write_round(&engine, (0..60).filter(|i| i % 12 == round), round)?;

        let counts = engine.level_table_counts();
        assert!(counts[0] < 2, "{:?}", counts);
        assert!(engine.level_sizes()[1] <= limit, "{:?}", engine.level_sizes());
        assert_disjoint(&engine, 2);
        assert_disjoint(&engine, 3);
    }
    assert!(engine.level_table_counts()[2] > 1, "output is split by target size");

    for i in 0..60 {
        assert_eq!(engine.get(&key(i))?, Some(format!("{}@{}", key(i), i % 12).into_bytes()));
    }
    Ok(())
}

#[test]
fn leveled_overwrites_resolve_to_newest() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(leveled(dir.path()))?;

    for round in 0..10 {
        write_round(&engine, 0..8, round)?;
    }
    for i in (0..8).step_by(2) {
        engine.delete(&key(i))?;
    }
    engine.flush()?;
    engine.compact()?;

    for i in 0..8 {
        let expected = (i % 2 == 1).then(|| format!("{}@9", key(i)).into_bytes());
        assert_eq!(engine.get(&key(i))?, expected);
    }
    assert_disjoint(&engine, 2);
    assert_disjoint(&engine, 3);
    Ok(())
}

#[test]
fn manual_compact_without_work_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(leveled(dir.path()))?;

    engine.compact()?;
    write_round(&engine, 0..3, 1)?;
    engine.compact()?;
    assert_eq!(engine.level_table_counts(), vec![1, 0, 0]);
    Ok(())
}
