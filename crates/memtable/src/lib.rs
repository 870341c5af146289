//! # Memtable - in-memory write buffer
//!
//! Every write lands in a [`Memtable`] after it has been logged to the WAL.
//! A memtable is a thin capacity-bounded wrapper around one
//! [`OrderedMap`] implementation, chosen once from configuration:
//!
//! | Structure     | Notes                                                   |
//! |---------------|---------------------------------------------------------|
//! | [`BTree`]     | multiway search tree, splits on overflow                |
//! | [`SkipList`]  | arena-allocated skip list with randomized heights       |
//! | [`HashTable`] | fixed-capacity hash map, sorted only when drained       |
//!
//! Deletes are *logical*: the entry stays in place with its tombstone flag
//! set, so it still shadows older versions of the key once flushed.
//!
//! A [`MemtableSet`] keeps a ring of memtables so that a full one can wait
//! for its flush while writes continue in the next slot.

mod btree;
mod hashtable;
mod set;
mod skiplist;

pub use btree::BTree;
pub use hashtable::HashTable;
pub use set::MemtableSet;
pub use skiplist::SkipList;

use config::{MemtableConfig, MemtableKind};
use thiserror::Error;

/// One versioned key. `value` is empty and meaningless for tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub tombstone: bool,
    pub timestamp: u64,
}

impl Record {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            tombstone: false,
            timestamp,
        }
    }

    pub fn tombstone(key: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            tombstone: true,
            timestamp,
        }
    }

    /// The live value, or `None` for a tombstone.
    #[must_use]
    pub fn live_value(&self) -> Option<&[u8]> {
        (!self.tombstone).then_some(self.value.as_slice())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemtableError {
    /// No room for another distinct key; the memtable must be flushed.
    #[error("memtable is full")]
    Full,
    /// Logical delete of a key the memtable does not hold.
    #[error("key not found in memtable")]
    NotFound,
}

/// Capability shared by every in-memory ordered structure.
///
/// `insert` is insert-or-update by key. `mark_deleted` flips the tombstone
/// flag of an existing entry and never creates one. Traversals return every
/// record in ascending key order, tombstones included.
pub trait OrderedMap: Send + Sync + std::fmt::Debug {
    fn insert(&mut self, record: Record) -> Result<(), MemtableError>;

    fn get(&self, key: &[u8]) -> Option<&Record>;

    fn mark_deleted(&mut self, key: &[u8], timestamp: u64) -> Result<(), MemtableError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of all records; the structure is left untouched.
    fn records(&self) -> Vec<Record>;

    /// Moves all records out in sorted order, leaving the structure empty.
    fn drain_sorted(&mut self) -> Vec<Record>;
}

/// Builds the structure named by `config.kind`.
pub fn new_ordered_map(config: &MemtableConfig) -> Box<dyn OrderedMap> {
    match config.kind {
        MemtableKind::BTree => Box::new(BTree::new(config.btree_degree)),
        MemtableKind::SkipList => Box::new(SkipList::new(config.skiplist_max_height)),
        MemtableKind::HashMap => Box::new(HashTable::with_capacity(config.capacity)),
    }
}

/// A capacity-bounded ordered map of the most recent writes.
#[derive(Debug)]
pub struct Memtable {
    map: Box<dyn OrderedMap>,
    capacity: usize,
    /// Oldest WAL segment holding one of this memtable's records.
    wal_segment: Option<u64>,
}

impl Memtable {
    pub fn new(map: Box<dyn OrderedMap>, capacity: usize) -> Self {
        Self {
            map,
            capacity: capacity.max(1),
            wal_segment: None,
        }
    }

    pub fn from_config(config: &MemtableConfig) -> Self {
        Self::new(new_ordered_map(config), config.capacity)
    }

    /// Inserts or updates a record.
    ///
    /// A record older than the stored version of the same key is ignored.
    /// A new key beyond capacity returns [`MemtableError::Full`].
    pub fn add(&mut self, record: Record) -> Result<(), MemtableError> {
        match self.map.get(&record.key) {
            Some(existing) if existing.timestamp > record.timestamp => return Ok(()),
            Some(_) => {}
            None if self.is_full() => return Err(MemtableError::Full),
            None => {}
        }
        self.map.insert(record)
    }

    /// Marks an existing key deleted as of `timestamp`.
    pub fn delete(&mut self, key: &[u8], timestamp: u64) -> Result<(), MemtableError> {
        self.map.mark_deleted(key, timestamp)
    }

    /// Returns a copy of the stored record, tombstones included.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        self.map.get(key).cloned()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.map.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sorted copy of the contents.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.map.records()
    }

    /// Drains the memtable in key order for writing to a table file.
    pub fn flush(&mut self) -> Vec<Record> {
        self.wal_segment = None;
        self.map.drain_sorted()
    }

    /// Remembers `segment` if it is the first WAL segment this memtable
    /// depends on.
    pub fn note_wal_segment(&mut self, segment: u64) {
        self.wal_segment.get_or_insert(segment);
    }

    #[must_use]
    pub fn wal_segment(&self) -> Option<u64> {
        self.wal_segment
    }
}
