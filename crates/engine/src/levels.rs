//! On-disk level layout and its in-memory mirror.
//!
//! ```text
//! <data_dir>/L001/TOC/usertable-<label>-TOC.txt
//! <data_dir>/L001/usertable-<label>-Data.db ...
//! <data_dir>/L002/...
//! <data_dir>/LABEL
//! ```

use config::{CompactionStrategy, EngineConfig};
use sstable::format::{parse_label, parse_toc_label, TOC_DIR};
use sstable::{KeyCodec, SSTable};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::Result;

const LABEL_FILE: &str = "LABEL";

/// `<data_dir>/L<NNN>`
pub(crate) fn level_dir(data_dir: &Path, level: usize) -> PathBuf {
    data_dir.join(format!("L{level:03}"))
}

/// TOC paths of `level`, ascending by label.
pub(crate) fn tables_for_level(data_dir: &Path, level: usize) -> Result<Vec<(u64, PathBuf)>> {
    let toc_dir = level_dir(data_dir, level).join(TOC_DIR);
    let entries = match fs::read_dir(&toc_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut tables = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(label) = entry.file_name().to_str().and_then(parse_toc_label) {
            tables.push((label, entry.path()));
        }
    }
    tables.sort_unstable_by_key(|(label, _)| *label);
    Ok(tables)
}

/// Removes leftovers of interrupted writes in one level: `*.tmp` files and
/// block files whose table never got a TOC.
pub(crate) fn remove_unpublished(level_dir: &Path, published: &HashSet<u64>) -> Result<usize> {
    let mut removed = 0;
    for dir in [level_dir.to_path_buf(), level_dir.join(TOC_DIR)] {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let orphan = name.ends_with(".tmp")
                || parse_label(name).is_some_and(|label| !published.contains(&label));
            if orphan {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
    }
    if removed > 0 {
        tracing::warn!(dir = %level_dir.display(), removed, "removed unpublished table files");
    }
    Ok(removed)
}

/// Open tables per level. Index 0 holds level 1.
///
/// Level 1, and every level under size-tiered compaction, is kept in label
/// order. Deeper leveled levels are kept in start-key order.
#[derive(Debug, Clone)]
pub(crate) struct Levels {
    strategy: CompactionStrategy,
    levels: Vec<Vec<Arc<SSTable>>>,
}

impl Levels {
    pub(crate) fn new(strategy: CompactionStrategy, max_level: usize) -> Self {
        Self {
            strategy,
            levels: vec![Vec::new(); max_level],
        }
    }

    /// Opens every published table under `config.data_dir`.
    pub(crate) fn load(config: &EngineConfig, keys: &KeyCodec) -> Result<Self> {
        let data_dir = &config.data_dir;
        let max_level = config.compaction.max_level;
        let mut levels = Self::new(config.compaction.strategy, max_level);

        for level in 1..=max_level {
            let tables = tables_for_level(data_dir, level)?;
            let published: HashSet<u64> = tables.iter().map(|(label, _)| *label).collect();
            remove_unpublished(&level_dir(data_dir, level), &published)?;

            for (_, toc_path) in tables {
                levels.insert(level, Arc::new(SSTable::open(&toc_path, keys)?));
            }
        }

        let beyond = tables_for_level(data_dir, max_level + 1)?;
        if !beyond.is_empty() {
            tracing::warn!(
                level = max_level + 1,
                tables = beyond.len(),
                "ignoring tables below the configured max level"
            );
        }
        Ok(levels)
    }

    pub(crate) fn max_level(&self) -> usize {
        self.levels.len()
    }

    /// Tables of `level` (1-based); empty for levels out of range.
    pub(crate) fn level(&self, level: usize) -> &[Arc<SSTable>] {
        level
            .checked_sub(1)
            .and_then(|i| self.levels.get(i))
            .map_or(&[][..], Vec::as_slice)
    }

    fn key_ordered(&self, level: usize) -> bool {
        self.strategy == CompactionStrategy::Leveled && level >= 2
    }

    pub(crate) fn insert(&mut self, level: usize, table: Arc<SSTable>) {
        let key_ordered = self.key_ordered(level);
        let Some(tables) = level.checked_sub(1).and_then(|i| self.levels.get_mut(i)) else {
            return;
        };
        let pos = if key_ordered {
            tables.partition_point(|t| t.start_key() < table.start_key())
        } else {
            tables.partition_point(|t| t.label() < table.label())
        };
        tables.insert(pos, table);
    }

    /// Drops every table whose label is in `labels` from every level.
    pub(crate) fn remove(&mut self, labels: &HashSet<u64>) {
        for tables in &mut self.levels {
            tables.retain(|t| !labels.contains(&t.label()));
        }
    }

    /// Candidate tables of `level` that might hold `key`.
    ///
    /// Key-ordered levels yield at most the single table whose range could
    /// contain the key; other levels yield every table passing its filter.
    pub(crate) fn candidates(&self, level: usize, key: &[u8]) -> Vec<Arc<SSTable>> {
        let tables = self.level(level);
        if self.key_ordered(level) {
            let idx = tables.partition_point(|t| t.start_key() <= key);
            return idx
                .checked_sub(1)
                .map(|i| &tables[i])
                .filter(|t| t.may_contain(key))
                .cloned()
                .into_iter()
                .collect();
        }
        tables
            .iter()
            .filter(|t| t.may_contain(key))
            .cloned()
            .collect()
    }

    pub(crate) fn table_counts(&self) -> Vec<usize> {
        self.levels.iter().map(Vec::len).collect()
    }

    pub(crate) fn table_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub(crate) fn data_sizes(&self) -> Vec<u64> {
        self.levels
            .iter()
            .map(|tables| tables.iter().map(|t| t.data_size()).sum())
            .collect()
    }

    pub(crate) fn level_size(&self, level: usize) -> u64 {
        self.level(level).iter().map(|t| t.data_size()).sum()
    }

    pub(crate) fn max_label(&self) -> u64 {
        self.all().map(|t| t.label()).max().unwrap_or(0)
    }

    pub(crate) fn max_timestamp(&self) -> u64 {
        self.all()
            .map(|t| t.metadata().max_timestamp)
            .max()
            .unwrap_or(0)
    }

    /// Every table, shallow levels first.
    pub(crate) fn all(&self) -> impl Iterator<Item = &Arc<SSTable>> {
        self.levels.iter().flatten()
    }
}

/// Hands out table labels. The last label handed out is persisted in
/// `<data_dir>/LABEL` (temp file + rename) before it is used.
#[derive(Debug)]
pub(crate) struct LabelAllocator {
    path: PathBuf,
    last: AtomicU64,
}

impl LabelAllocator {
    /// Resumes after the larger of the persisted label and `floor`.
    pub(crate) fn open(data_dir: &Path, floor: u64) -> Result<Self> {
        let path = data_dir.join(LABEL_FILE);
        let persisted = match fs::read_to_string(&path) {
            Ok(text) => text.trim().parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!(path = %path.display(), "unreadable label file, rebuilding from tables");
                0
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            last: AtomicU64::new(persisted.max(floor)),
        })
    }

    pub(crate) fn next(&self) -> Result<u64> {
        let label = self.last.fetch_add(1, Ordering::AcqRel) + 1;
        self.persist(label)?;
        Ok(label)
    }

    fn persist(&self, label: u64) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            writeln!(f, "{label}")?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}
