use super::*;
use anyhow::Result;
use tempfile::tempdir;

fn keys_of(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| String::from_utf8_lossy(&r.key).into_owned())
        .collect()
}

/// Keys 0..20 spread over two tables and the memtables, with some
/// overwrites and deletes layered on top.
fn layered(dir: &Path) -> Result<Engine> {
    let mut config = small_config(dir);
    config.memtable.capacity = 8;
    let engine = Engine::open(config)?;

    write_round(&engine, 0..8, 1)?;
    write_round(&engine, 8..16, 1)?;
    for i in 16..20 {
        engine.put(&key(i), b"mem")?;
    }
    engine.put(&key(3), b"updated")?;
    engine.delete(&key(5))?;
    engine.delete(&key(17))?;
    Ok(engine)
}

#[test]
fn range_scan_merges_all_sources() -> Result<()> {
    let dir = tempdir()?;
    let engine = layered(dir.path())?;

    let records = engine.range_scan(&key(0), &key(19), 1, 100)?;
    let expected: Vec<String> = (0..20).filter(|i| *i != 5 && *i != 17).map(key).collect();
    assert_eq!(keys_of(&records), expected);
    assert!(records.windows(2).all(|w| w[0].key < w[1].key));
    assert!(records.iter().all(|r| !r.tombstone));
    assert_eq!(records[3].value, b"updated");
    Ok(())
}

#[test]
fn range_bounds_are_inclusive() -> Result<()> {
    let dir = tempdir()?;
    let engine = layered(dir.path())?;

    let records = engine.range_scan(&key(6), &key(9), 1, 100)?;
    assert_eq!(keys_of(&records), vec![key(6), key(7), key(8), key(9)]);

    let between = engine.range_scan("key0006x", "key0008", 1, 100)?;
    assert_eq!(keys_of(&between), vec![key(7), key(8)]);
    Ok(())
}

#[test]
fn inverted_range_is_empty() -> Result<()> {
    let dir = tempdir()?;
    let engine = layered(dir.path())?;

    assert!(engine.range_scan(&key(9), &key(3), 1, 10)?.is_empty());
    Ok(())
}

#[test]
fn prefix_scan_matches_only_prefix() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(small_config(dir.path()))?;

    for k in ["app", "apple", "applet", "apricot", "banana", "ap"] {
        engine.put(k, k.as_bytes())?;
    }
    engine.flush()?;
    engine.put("apply", b"mem")?;
    engine.delete("applet")?;

    let records = engine.prefix_scan("appl", 1, 10)?;
    assert_eq!(keys_of(&records), vec!["apple", "apply"]);

    let all = engine.prefix_scan("", 1, 10)?;
    assert_eq!(keys_of(&all), vec!["ap", "app", "apple", "apply", "apricot", "banana"]);

    assert!(engine.prefix_scan("zzz", 1, 10)?.is_empty());
    Ok(())
}

#[test]
fn paging_walks_the_result_set() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(small_config(dir.path()))?;
    for i in 0..10 {
        engine.put(&key(i), b"v")?;
    }

    let sizes: Vec<usize> = (1..=5)
        .map(|page| engine.range_scan(&key(0), &key(9), page, 3).map(|r| r.len()))
        .collect::<crate::Result<_>>()?;
    assert_eq!(sizes, vec![3, 3, 3, 1, 0]);

    let second = engine.prefix_scan("key", 2, 3)?;
    assert_eq!(keys_of(&second), vec![key(3), key(4), key(5)]);
    Ok(())
}

#[test]
fn zero_page_arguments_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(small_config(dir.path()))?;

    assert!(matches!(engine.range_scan("a", "z", 0, 10), Err(Error::InvalidArgument(_))));
    assert!(matches!(engine.range_scan("a", "z", 1, 0), Err(Error::InvalidArgument(_))));
    assert!(matches!(engine.prefix_scan("a", 0, 10), Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn reserved_keys_are_hidden_from_scans() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(small_config(dir.path()))?;

    engine.put("__bloom__/users", b"bits")?;
    engine.put("__ratelimit__/api", b"tokens")?;
    engine.put("a", b"1")?;
    engine.flush()?;
    engine.put("__hll__/visits", b"regs")?;

    let all = engine.prefix_scan("", 1, 100)?;
    assert_eq!(keys_of(&all), vec!["a"]);
    assert!(engine.prefix_scan("__bloom__/", 1, 10)?.is_empty());

    assert_eq!(engine.get("__bloom__/users")?, Some(b"bits".to_vec()));
    assert_eq!(engine.get("__hll__/visits")?, Some(b"regs".to_vec()));
    Ok(())
}

#[test]
fn iterator_is_lazy_and_stoppable() -> Result<()> {
    let dir = tempdir()?;
    let engine = layered(dir.path())?;

    let mut it = engine.range_iterate(&key(0), &key(19))?;
    let first = it.next().unwrap()?;
    assert_eq!(first.key, key(0).as_bytes());
    assert!(!it.is_stopped());

    it.stop();
    assert!(it.is_stopped());
    assert!(it.next().is_none());
    Ok(())
}

#[test]
fn iterator_sees_a_point_in_time_view() -> Result<()> {
    let dir = tempdir()?;
    let engine = layered(dir.path())?;

    let it = engine.prefix_iterate("key")?;
    engine.put(&key(50), b"late")?;
    engine.delete(&key(0))?;
    engine.flush()?;

    let keys: Vec<String> = it
        .map(|r| r.map(|r| String::from_utf8_lossy(&r.key).into_owned()))
        .collect::<crate::Result<_>>()?;
    assert_eq!(keys.first(), Some(&key(0)));
    assert!(!keys.contains(&key(50)));
    assert_eq!(keys.len(), 18);
    Ok(())
}

#[test]
fn scans_survive_compaction() -> Result<()> {
    let dir = tempdir()?;
    let mut config = small_config(dir.path());
    config.compaction.strategy = CompactionStrategy::Leveled;
    config.compaction.max_tables_per_level = 2;
    config.compaction.first_level_size = 256;
    config.compaction.fanout = 2;
    config.compaction.target_table_size = 128;
    let engine = Engine::open(config)?;

    for round in 0..5 {
        write_round(&engine, (0..40).filter(|i| i % 5 == round), round)?;
    }
    for i in (0..40).step_by(4) {
        engine.delete(&key(i))?;
    }

    let records = engine.range_scan(&key(0), &key(39), 1, 100)?;
    let expected: Vec<String> = (0..40).filter(|i| i % 4 != 0).map(key).collect();
    assert_eq!(keys_of(&records), expected);
    Ok(())
}
