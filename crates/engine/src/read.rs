//! Read path: memtables, then the LRU cache, then levels 1..=max_level.
//!
//! Within level 1 (and every size-tiered level) all tables whose filter
//! passes are queried and the newest version wins. Deeper leveled levels
//! hold disjoint key ranges, so a binary search picks a single table. The
//! first level with a hit decides; deeper levels are not consulted.

use memtable::Record;
use std::sync::atomic::Ordering;

use crate::{validate_key, Engine, Result};

impl Engine {
    /// Looks up `key`. Deleted and absent keys both yield `None`.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self
            .get_record(key)?
            .and_then(|r| (!r.tombstone).then_some(r.value)))
    }

    /// Newest record for `key`, tombstones included.
    pub(crate) fn get_record(&self, key: &str) -> Result<Option<Record>> {
        let generation = self.generation.load(Ordering::Acquire);

        if let Some(record) = self.memtables.read().get(key.as_bytes()) {
            return Ok(Some(record));
        }
        if let Some(record) = self.cache.lock().get(key) {
            return Ok(Some(record));
        }

        let found = self.search_levels(key.as_bytes())?;
        if let Some(record) = &found {
            let mut cache = self.cache.lock();
            // A flush in between may have made `record` stale.
            if self.generation.load(Ordering::Acquire) == generation {
                cache.put(key, record.clone());
            }
        }
        Ok(found)
    }

    fn search_levels(&self, key: &[u8]) -> Result<Option<Record>> {
        let candidates: Vec<_> = {
            let levels = self.levels.read();
            (1..=levels.max_level())
                .map(|level| levels.candidates(level, key))
                .collect()
        };

        for tables in candidates {
            let mut best: Option<(Record, u64)> = None;
            for table in tables {
                let Some(record) = table.get(key)? else {
                    continue;
                };
                let newer = best.as_ref().map_or(true, |(b, label)| {
                    (record.timestamp, table.label()) > (b.timestamp, *label)
                });
                if newer {
                    best = Some((record, table.label()));
                }
            }
            if let Some((record, _)) = best {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}
