//! Fixed-capacity hash map. Lookups are O(1); ordering is produced only
//! when the contents are read out, by sorting on key.

use crate::{MemtableError, OrderedMap, Record};
use std::collections::HashMap;

/// Hash-map backed ordered map. Never grows beyond `capacity` keys.
#[derive(Debug)]
pub struct HashTable {
    map: HashMap<Vec<u8>, Record>,
    capacity: usize,
}

impl HashTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            map: HashMap::with_capacity(capacity),
            capacity,
        }
    }
}

impl OrderedMap for HashTable {
    fn insert(&mut self, record: Record) -> Result<(), MemtableError> {
        if let Some(existing) = self.map.get_mut(&record.key) {
            *existing = record;
            return Ok(());
        }
        if self.map.len() >= self.capacity {
            return Err(MemtableError::Full);
        }
        self.map.insert(record.key.clone(), record);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Option<&Record> {
        self.map.get(key)
    }

    fn mark_deleted(&mut self, key: &[u8], timestamp: u64) -> Result<(), MemtableError> {
        let record = self.map.get_mut(key).ok_or(MemtableError::NotFound)?;
        record.tombstone = true;
        record.value.clear();
        record.timestamp = record.timestamp.max(timestamp);
        Ok(())
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn records(&self) -> Vec<Record> {
        let mut out: Vec<Record> = self.map.values().cloned().collect();
        out.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        out
    }

    fn drain_sorted(&mut self) -> Vec<Record> {
        let mut out: Vec<Record> = self.map.drain().map(|(_, r)| r).collect();
        out.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        out
    }
}
