//! LRU cache of resolved records, keyed by the external string key.
//!
//! Recency is a logical tick: `entries` maps key -> (record, tick) and
//! `order` maps tick -> key, so the oldest entry is `order`'s first.

use memtable::Record;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
pub(crate) struct LruCache {
    capacity: usize,
    entries: HashMap<String, (Record, u64)>,
    order: BTreeMap<u64, String>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl LruCache {
    /// A capacity of 0 disables the cache.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Looks up `key`, marking it most recently used.
    pub(crate) fn get(&mut self, key: &str) -> Option<Record> {
        let tick = self.next_tick();
        let Some((record, used)) = self.entries.get_mut(key) else {
            self.misses += 1;
            return None;
        };
        let old = std::mem::replace(used, tick);
        let record = record.clone();
        if let Some(name) = self.order.remove(&old) {
            self.order.insert(tick, name);
        }
        self.hits += 1;
        Some(record)
    }

    /// Inserts or replaces `key`, evicting the least recently used entry
    /// when full.
    pub(crate) fn put(&mut self, key: &str, record: Record) {
        if self.capacity == 0 {
            return;
        }
        let tick = self.next_tick();
        if let Some((old_record, used)) = self.entries.get_mut(key) {
            *old_record = record;
            let old = std::mem::replace(used, tick);
            self.order.remove(&old);
            self.order.insert(tick, key.to_string());
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some((_, victim)) = self.order.pop_first() {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(key.to_string(), (record, tick));
        self.order.insert(tick, key.to_string());
    }

    /// Replaces `key` only if it is already cached; recency is untouched.
    pub(crate) fn refresh(&mut self, key: &str, record: &Record) {
        if let Some((cached, _)) = self.entries.get_mut(key) {
            *cached = record.clone();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
