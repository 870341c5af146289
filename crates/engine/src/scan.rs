//! Range and prefix scans.
//!
//! A scan merges sorted snapshots of every memtable (newest first) with
//! cursors over each table whose key range can intersect the scan (shallow
//! levels first, newer labels first within a level). The merge resolves
//! each key to its newest version; tombstones and reserved keys are then
//! dropped, so callers see live user keys in strictly ascending order.

use memtable::Record;
use sstable::{MergeIterator, RecordSource, SSTable, VecSource};
use std::sync::Arc;

use crate::{is_reserved, Engine, Error, Result};

#[derive(Debug, Clone)]
enum Bounds {
    /// Inclusive on both ends.
    Range { start: Vec<u8>, end: Vec<u8> },
    Prefix(Vec<u8>),
}

impl Bounds {
    fn start(&self) -> &[u8] {
        match self {
            Bounds::Range { start, .. } => start,
            Bounds::Prefix(prefix) => prefix,
        }
    }

    /// Keys arrive in ascending order, so the first key past the bound ends
    /// the scan.
    fn is_past(&self, key: &[u8]) -> bool {
        match self {
            Bounds::Range { end, .. } => key > end.as_slice(),
            Bounds::Prefix(prefix) => !key.starts_with(prefix),
        }
    }

    fn may_intersect(&self, table: &SSTable) -> bool {
        match self {
            Bounds::Range { start, end } => start <= end && table.overlaps(start, end),
            Bounds::Prefix(prefix) => {
                table.end_key() >= prefix.as_slice()
                    && (table.start_key() <= prefix.as_slice() || table.start_key().starts_with(prefix))
            }
        }
    }
}

/// Lazy, forward-only iterator over live records of a scan.
///
/// Holds a point-in-time view taken when it was created: later writes are
/// not observed. Yields `Err` at most once, after which it is exhausted.
pub struct ScanIterator {
    merged: MergeIterator,
    bounds: Bounds,
    stopped: bool,
}

impl ScanIterator {
    /// Ends iteration early; subsequent calls to `next` return `None`.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl std::fmt::Debug for ScanIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanIterator")
            .field("bounds", &self.bounds)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl Iterator for ScanIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.stopped {
            let record = match self.merged.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    self.stopped = true;
                    return Some(Err(e.into()));
                }
            };
            if self.bounds.is_past(&record.key) {
                break;
            }
            if record.tombstone || is_reserved(&record.key) {
                continue;
            }
            return Some(Ok(record));
        }
        self.stopped = true;
        None
    }
}

impl Engine {
    /// Page `page_number` (1-based) of live records with
    /// `start <= key <= end`, `page_size` records per page.
    pub fn range_scan(
        &self,
        start: &str,
        end: &str,
        page_number: usize,
        page_size: usize,
    ) -> Result<Vec<Record>> {
        let skip = page_offset(page_number, page_size)?;
        self.range_iterate(start, end)?.skip(skip).take(page_size).collect()
    }

    /// Page `page_number` (1-based) of live records whose key starts with
    /// `prefix`.
    pub fn prefix_scan(&self, prefix: &str, page_number: usize, page_size: usize) -> Result<Vec<Record>> {
        let skip = page_offset(page_number, page_size)?;
        self.prefix_iterate(prefix)?.skip(skip).take(page_size).collect()
    }

    /// Lazy iterator over live records with `start <= key <= end`.
    pub fn range_iterate(&self, start: &str, end: &str) -> Result<ScanIterator> {
        self.scan(Bounds::Range {
            start: start.as_bytes().to_vec(),
            end: end.as_bytes().to_vec(),
        })
    }

    /// Lazy iterator over live records whose key starts with `prefix`.
    pub fn prefix_iterate(&self, prefix: &str) -> Result<ScanIterator> {
        self.scan(Bounds::Prefix(prefix.as_bytes().to_vec()))
    }

    fn scan(&self, bounds: Bounds) -> Result<ScanIterator> {
        let start = bounds.start();
        let mut sources: Vec<Box<dyn RecordSource + Send>> = Vec::new();

        let memtables = self.memtables.read();
        for mut records in memtables.snapshot() {
            let from = records.partition_point(|r| r.key.as_slice() < start);
            sources.push(Box::new(VecSource::new(records.split_off(from))));
        }

        // Cursors are opened under the layout lock so a concurrent
        // compaction cannot delete their files first.
        let levels = self.levels.read();
        drop(memtables);
        for level in 1..=levels.max_level() {
            let mut tables: Vec<&Arc<SSTable>> = levels
                .level(level)
                .iter()
                .filter(|t| bounds.may_intersect(t))
                .collect();
            tables.sort_by(|a, b| b.label().cmp(&a.label()));
            for table in tables {
                sources.push(Box::new(table.cursor(Some(start))?));
            }
        }
        drop(levels);

        Ok(ScanIterator {
            merged: MergeIterator::new(sources),
            bounds,
            stopped: false,
        })
    }
}

fn page_offset(page_number: usize, page_size: usize) -> Result<usize> {
    if page_number == 0 {
        return Err(Error::InvalidArgument("page_number starts at 1".into()));
    }
    if page_size == 0 {
        return Err(Error::InvalidArgument("page_size must be positive".into()));
    }
    Ok((page_number - 1).saturating_mul(page_size))
}
