use crate::*;
use std::fs;
use std::path::{Path, PathBuf};

mod compaction_tests;
mod scan_tests;

/// Tiny capacities so flushes and compactions happen after a few writes.
/// Compaction is effectively off until a test lowers
/// `max_tables_per_level`.
fn small_config(dir: &Path) -> EngineConfig {
    init_tracing();
    let mut config = EngineConfig::with_data_dir(dir);
    config.memtable.capacity = 4;
    config.memtable.instances = 1;
    config.table.index_degree = 2;
    config.table.summary_degree = 2;
    config.compaction.max_level = 3;
    config.compaction.max_tables_per_level = 100;
    config
}

/// Honours `RUST_LOG` when debugging a failing test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn key(i: usize) -> String {
    format!("key{:04}", i)
}

/// Writes `keys` with value `"<key>@<round>"` and flushes them into a
/// single level-1 table.
fn write_round(engine: &Engine, keys: impl IntoIterator<Item = usize>, round: usize) -> anyhow::Result<()> {
    for i in keys {
        let k = key(i);
        engine.put(&k, format!("{}@{}", k, round).as_bytes())?;
    }
    engine.flush()?;
    Ok(())
}

/// Files directly inside a level directory (TOC subdirectory excluded).
fn table_files(data_dir: &Path, level: usize) -> Vec<PathBuf> {
    match fs::read_dir(levels::level_dir(data_dir, level)) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn wal_segments(data_dir: &Path) -> usize {
    fs::read_dir(data_dir.join(WAL_DIR))
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}
