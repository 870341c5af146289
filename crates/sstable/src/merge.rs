//! K-way merge over key-ordered record sources.
//!
//! Sources are memtable snapshots ([`VecSource`]) or table cursors
//! ([`TableCursor`](crate::TableCursor)). The merged stream is ascending by
//! key with one record per key: the one with the highest timestamp, and on
//! equal timestamps the one from the source listed first. Tombstones are
//! yielded like any other record; filtering them is up to the caller.

use memtable::Record;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::reader::SSTable;
use crate::writer::{TableInfo, TableWriter};
use crate::Result;

/// A key-ordered stream positioned at its current record.
pub trait RecordSource {
    /// The current record, `None` once exhausted.
    fn value(&self) -> Option<&Record>;

    /// Moves to the next record; `Ok(false)` once exhausted.
    fn advance(&mut self) -> Result<bool>;
}

/// In-memory source over an already sorted vector.
#[derive(Debug)]
pub struct VecSource {
    rest: std::vec::IntoIter<Record>,
    current: Option<Record>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        let mut rest = records.into_iter();
        let current = rest.next();
        Self { rest, current }
    }
}

impl RecordSource for VecSource {
    fn value(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<bool> {
        self.current = self.rest.next();
        Ok(self.current.is_some())
    }
}

/// Head of one source inside the heap.
struct HeapEntry {
    key: Vec<u8>,
    timestamp: u64,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: smallest key first, then newest, then lowest source index.
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
            .then_with(|| other.source.cmp(&self.source))
    }
}

pub struct MergeIterator {
    sources: Vec<Box<dyn RecordSource + Send>>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// `sources` are ordered by priority: on equal timestamps the earlier
    /// source wins.
    pub fn new(sources: Vec<Box<dyn RecordSource + Send>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            if let Some(record) = source.value() {
                heap.push(HeapEntry {
                    key: record.key.clone(),
                    timestamp: record.timestamp,
                    source: i,
                });
            }
        }
        Self { sources, heap }
    }

    /// Convenience constructor over open tables, newest label first.
    pub fn over_tables(tables: &[Arc<SSTable>]) -> Result<Self> {
        let mut ordered: Vec<&Arc<SSTable>> = tables.iter().collect();
        ordered.sort_by(|a, b| b.label().cmp(&a.label()));
        let mut sources: Vec<Box<dyn RecordSource + Send>> = Vec::with_capacity(ordered.len());
        for table in ordered {
            sources.push(Box::new(table.cursor(None)?));
        }
        Ok(Self::new(sources))
    }

    /// Next winning record, or `None` once every source is exhausted.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        let Some(best) = self.sources[top.source].value().cloned() else {
            return Ok(None);
        };
        self.step(top.source)?;

        // Every other source sitting on the same key loses.
        while self.heap.peek().is_some_and(|e| e.key == best.key) {
            if let Some(dup) = self.heap.pop() {
                self.step(dup.source)?;
            }
        }
        Ok(Some(best))
    }

    fn step(&mut self, source: usize) -> Result<()> {
        if self.sources[source].advance()? {
            if let Some(record) = self.sources[source].value() {
                self.heap.push(HeapEntry {
                    key: record.key.clone(),
                    timestamp: record.timestamp,
                    source,
                });
            }
        }
        Ok(())
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.heap.clear();
                Some(Err(e))
            }
        }
    }
}

/// Streams the merge of `tables` into `writer`, skipping records for which
/// `keep` returns `false`. Sources are left for the caller to delete once
/// the output is published.
///
/// Fails with [`SSTableError::Empty`](crate::SSTableError::Empty) when
/// nothing survives.
pub fn merge_tables<F>(tables: &[Arc<SSTable>], mut writer: TableWriter, mut keep: F) -> Result<TableInfo>
where
    F: FnMut(&Record) -> bool,
{
    let mut merged = MergeIterator::over_tables(tables)?;
    while let Some(record) = merged.next_record()? {
        if keep(&record) {
            writer.push(&record)?;
        }
    }
    writer.finish()
}
