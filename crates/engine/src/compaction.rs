//! Compaction: size-tiered and leveled.
//!
//! Both strategies stream a k-way merge of their input tables into new
//! tables one level down. Outputs are published (TOC renamed into place)
//! before the level layout is swapped, and inputs are deleted last, so a
//! crash at any point leaves either the inputs or the outputs readable.
//!
//! A tombstone is dropped only when it is written to the last level and no
//! table staying in that level covers its key; otherwise it still has an
//! older version to shadow.

use config::CompactionStrategy;
use sstable::{merge_tables, MergeIterator, SSTable, SSTableError, TableInfo, TableWriter};
use std::collections::HashSet;
use std::sync::Arc;

use crate::{Engine, Result};

impl Engine {
    /// Runs compaction until every level is within its bounds.
    pub fn compact(&self) -> Result<()> {
        let _writer = self.wal.lock();
        self.run_compaction()
    }

    /// Caller holds the writer lock.
    pub(crate) fn run_compaction(&self) -> Result<()> {
        match self.config.compaction.strategy {
            CompactionStrategy::SizeTiered => self.compact_size_tiered(),
            CompactionStrategy::Leveled => self.compact_leveled(),
        }
    }

    /// Folds every level holding `max_tables_per_level` tables into a
    /// single table on the next level, cascading downwards.
    fn compact_size_tiered(&self) -> Result<()> {
        let max_level = self.config.compaction.max_level;
        for level in 1..max_level {
            let (inputs, staying) = {
                let levels = self.levels.read();
                (levels.level(level).to_vec(), levels.level(level + 1).to_vec())
            };
            if inputs.len() < self.config.compaction.max_tables_per_level {
                continue;
            }

            let target = level + 1;
            let label = self.labels.next()?;
            let writer = TableWriter::create(
                self.level_dir(target),
                label,
                target,
                expected_records(&inputs),
                self.table_options.clone(),
            )?;
            let drop_tombstones = target == max_level;
            let outputs = match merge_tables(&inputs, writer, |r| {
                !(drop_tombstones && r.tombstone && !covered(&staying, &r.key))
            }) {
                Ok(info) => vec![info],
                Err(SSTableError::Empty) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            self.install(level, &inputs, target, outputs)?;
        }
        Ok(())
    }

    /// Level 1 is bounded by table count, deeper levels by data size. An
    /// over-limit level pushes tables into the next one together with every
    /// overlapping table there; the output is split by
    /// `target_table_size` so deeper levels keep disjoint key ranges.
    fn compact_leveled(&self) -> Result<()> {
        let max_level = self.config.compaction.max_level;
        for level in 1..max_level {
            while self.over_limit(level) {
                let target = level + 1;
                let (inputs, staying) = {
                    let levels = self.levels.read();
                    let picked: Vec<Arc<SSTable>> = if level == 1 {
                        levels.level(1).to_vec()
                    } else {
                        levels
                            .level(level)
                            .iter()
                            .min_by_key(|t| t.label())
                            .cloned()
                            .into_iter()
                            .collect()
                    };
                    let Some(start) = picked.iter().map(|t| t.start_key()).min() else {
                        break;
                    };
                    let end = picked.iter().map(|t| t.end_key()).max().unwrap_or(start);

                    let (overlapping, staying): (Vec<_>, Vec<_>) = levels
                        .level(target)
                        .iter()
                        .cloned()
                        .partition(|t| t.overlaps(start, end));
                    let mut inputs = picked;
                    inputs.extend(overlapping);
                    (inputs, staying)
                };

                let outputs = self.write_split(&inputs, target, &staying)?;
                self.install(level, &inputs, target, outputs)?;
            }
        }
        Ok(())
    }

    fn over_limit(&self, level: usize) -> bool {
        let levels = self.levels.read();
        if level == 1 {
            return levels.level(1).len() >= self.config.compaction.max_tables_per_level;
        }
        self.config
            .level_size_limit(level)
            .is_some_and(|limit| levels.level_size(level) > limit)
    }

    /// Merges `inputs` into as many `target`-level tables as
    /// `target_table_size` requires.
    fn write_split(
        &self,
        inputs: &[Arc<SSTable>],
        target: usize,
        staying: &[Arc<SSTable>],
    ) -> Result<Vec<TableInfo>> {
        let drop_tombstones = target == self.config.compaction.max_level;
        let limit = self.config.compaction.target_table_size;
        let expected = expected_records(inputs);
        let dir = self.level_dir(target);

        let mut merged = MergeIterator::over_tables(inputs)?;
        let mut outputs = Vec::new();
        let mut writer: Option<TableWriter> = None;

        let result = (|| -> Result<()> {
            while let Some(record) = merged.next_record()? {
                if drop_tombstones && record.tombstone && !covered(staying, &record.key) {
                    continue;
                }
                if writer.is_none() {
                    writer = Some(TableWriter::create(
                        &dir,
                        self.labels.next()?,
                        target,
                        expected,
                        self.table_options.clone(),
                    )?);
                }
                let mut full = false;
                if let Some(current) = writer.as_mut() {
                    current.push(&record)?;
                    full = current.data_size() >= limit;
                }
                if full {
                    if let Some(done) = writer.take() {
                        outputs.push(done.finish()?);
                    }
                }
            }
            if let Some(last) = writer.take() {
                outputs.push(last.finish()?);
            }
            Ok(())
        })();

        if let Err(e) = result {
            // Published outputs are not in the layout yet; drop them.
            for info in &outputs {
                if let Ok(table) = SSTable::open(&info.toc_path, &self.read_keys) {
                    let _ = table.delete_files();
                }
            }
            return Err(e);
        }
        Ok(outputs)
    }

    /// Swaps `inputs` for `outputs` in the layout, then deletes the input
    /// files.
    fn install(
        &self,
        level: usize,
        inputs: &[Arc<SSTable>],
        target: usize,
        outputs: Vec<TableInfo>,
    ) -> Result<()> {
        let mut opened = Vec::with_capacity(outputs.len());
        for info in &outputs {
            opened.push(Arc::new(SSTable::open(&info.toc_path, &self.read_keys)?));
        }
        let records: u64 = opened.iter().map(|t| t.len()).sum();
        let removed: HashSet<u64> = inputs.iter().map(|t| t.label()).collect();
        {
            let mut levels = self.levels.write();
            levels.remove(&removed);
            for table in opened {
                levels.insert(target, table);
            }
        }

        let mut failure = None;
        for table in inputs {
            if let Err(e) = table.delete_files() {
                tracing::warn!(label = table.label(), error = %e, "failed to delete compacted table");
                failure.get_or_insert(e);
            }
        }

        tracing::info!(
            from = level,
            to = target,
            inputs = inputs.len(),
            outputs = outputs.len(),
            records,
            "compacted"
        );
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn expected_records(tables: &[Arc<SSTable>]) -> usize {
    tables
        .iter()
        .map(|t| usize::try_from(t.len()).unwrap_or(usize::MAX))
        .fold(0, usize::saturating_add)
}

fn covered(tables: &[Arc<SSTable>], key: &[u8]) -> bool {
    tables.iter().any(|t| t.covers(key))
}
