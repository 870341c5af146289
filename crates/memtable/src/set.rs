use crate::{Memtable, MemtableError, Record};
use config::MemtableConfig;

/// A fixed ring of memtables with one active slot.
///
/// Writes go to the active memtable. When it fills up, [`rotate`] advances
/// to the next slot; if that slot still holds unflushed data (the ring has
/// wrapped), the caller writes [`pending_flush`] to a table file first.
/// With one instance every rotation is a flush.
///
/// [`rotate`]: MemtableSet::rotate
/// [`pending_flush`]: MemtableSet::pending_flush
#[derive(Debug)]
pub struct MemtableSet {
    tables: Vec<Memtable>,
    current: usize,
}

impl MemtableSet {
    pub fn from_config(config: &MemtableConfig) -> Self {
        let tables = (0..config.instances.max(1))
            .map(|_| Memtable::from_config(config))
            .collect();
        Self { tables, current: 0 }
    }

    pub fn from_tables(tables: Vec<Memtable>) -> Self {
        assert!(!tables.is_empty(), "a memtable set needs at least one memtable");
        Self { tables, current: 0 }
    }

    /// Adds to the active memtable.
    pub fn add(&mut self, record: Record) -> Result<(), MemtableError> {
        self.tables[self.current].add(record)
    }

    /// Logical delete in the active memtable only; older slots are
    /// immutable while they wait for their flush.
    pub fn delete(&mut self, key: &[u8], timestamp: u64) -> Result<(), MemtableError> {
        self.tables[self.current].delete(key, timestamp)
    }

    /// Newest version of `key` across every memtable in the ring.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        self.tables
            .iter()
            .filter_map(|t| t.get(key))
            .max_by_key(|r| r.timestamp)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tables[self.current].is_full()
    }

    /// Sorted copy of the slot [`rotate`] would enter, if it still holds
    /// data. That data must reach a table before rotating.
    ///
    /// [`rotate`]: MemtableSet::rotate
    #[must_use]
    pub fn pending_flush(&self) -> Option<Vec<Record>> {
        let next = &self.tables[(self.current + 1) % self.tables.len()];
        (!next.is_empty()).then(|| next.records())
    }

    /// Advances the active slot, draining the slot being entered if it still
    /// holds data.
    pub fn rotate(&mut self) -> Option<Vec<Record>> {
        self.current = (self.current + 1) % self.tables.len();
        let next = &mut self.tables[self.current];
        (!next.is_empty()).then(|| next.flush())
    }

    /// Sorted copies of every non-empty memtable with its slot index,
    /// oldest first. Slots stay filled until [`clear_slot`].
    ///
    /// [`clear_slot`]: MemtableSet::clear_slot
    #[must_use]
    pub fn unflushed(&self) -> Vec<(usize, Vec<Record>)> {
        let n = self.tables.len();
        (1..=n)
            .map(|offset| (self.current + offset) % n)
            .filter(|&i| !self.tables[i].is_empty())
            .map(|i| (i, self.tables[i].records()))
            .collect()
    }

    /// Empties slot `index` and releases its WAL segment.
    pub fn clear_slot(&mut self, index: usize) {
        self.tables[index].flush();
    }

    /// Sorted copies of every non-empty memtable, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Vec<Record>> {
        let n = self.tables.len();
        (0..n)
            .map(|offset| (self.current + n - offset) % n)
            .map(|i| &self.tables[i])
            .filter(|t| !t.is_empty())
            .map(Memtable::records)
            .collect()
    }

    pub fn note_wal_segment(&mut self, segment: u64) {
        self.tables[self.current].note_wal_segment(segment);
    }

    /// Oldest WAL segment still needed by unflushed data.
    #[must_use]
    pub fn min_wal_segment(&self) -> Option<u64> {
        self.tables.iter().filter_map(Memtable::wal_segment).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.iter().map(Memtable::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(Memtable::is_empty)
    }

    #[must_use]
    pub fn instances(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }
}
