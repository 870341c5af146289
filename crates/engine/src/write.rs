//! Write path: `put()`, `delete()`, `flush()` and memtable rotation.
//!
//! Each mutation is appended to the WAL first, then applied to the current
//! memtable. A memtable that reports `Full` makes the set rotate; when the
//! ring wraps onto an occupied slot, that slot is written out as a new
//! level-1 table before the write is retried.

use memtable::{MemtableError, MemtableSet, Record};
use sstable::{write_table, SSTable};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use wal::Wal;

use crate::{validate_key, Engine, Result};

impl Engine {
    /// Stores `value` under `key`.
    ///
    /// An error means the write may or may not survive a reopen: the WAL
    /// record can be on disk even when applying it failed. Compaction
    /// problems triggered by the write are only logged.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let mut wal = self.wal.lock();
        let timestamp = self.clock.tick();
        wal.put_commit(key.as_bytes(), value, timestamp)?;
        self.apply(&mut wal, Record::put(key, value, timestamp))
    }

    /// Deletes `key`.
    ///
    /// A key held by the current memtable is flipped to a tombstone in
    /// place; otherwise a tombstone record is inserted so that older copies
    /// in other memtables or on disk are shadowed.
    pub fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut wal = self.wal.lock();
        let timestamp = self.clock.tick();
        wal.delete_commit(key.as_bytes(), &[], timestamp)?;

        {
            let mut memtables = self.memtables.write();
            match memtables.delete(key.as_bytes(), timestamp) {
                Ok(()) => {
                    memtables.note_wal_segment(wal.current_segment());
                    return Ok(());
                }
                Err(MemtableError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.apply(&mut wal, Record::tombstone(key, timestamp))
    }

    /// Writes every memtable out as level-1 tables (oldest first), purges
    /// the WAL and runs a compaction pass. A no-op when nothing is buffered.
    ///
    /// A memtable is emptied only once its table is installed; after an
    /// error the remaining memtables still hold their records.
    pub fn flush(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        wal.flush_buffer()?;

        let mut flushed = false;
        {
            let mut memtables = self.memtables.write();
            for (slot, records) in memtables.unflushed() {
                flushed |= self.flush_table(&records)?;
                memtables.clear_slot(slot);
            }
        }
        if flushed {
            self.after_flush(&mut wal)?;
        }
        Ok(())
    }

    /// Adds a logged record to the memtables and handles any flush it
    /// causes. The caller holds the writer lock.
    fn apply(&self, wal: &mut Wal, record: Record) -> Result<()> {
        let segment = wal.current_segment();
        let flushed = {
            let mut memtables = self.memtables.write();
            self.add_to_memtables(&mut memtables, record, segment)?
        };
        if flushed {
            self.after_flush(wal)?;
        }
        Ok(())
    }

    /// Inserts `record`, rotating on `Full`. Returns `true` if a memtable
    /// had to be flushed to make room.
    pub(crate) fn add_to_memtables(
        &self,
        memtables: &mut MemtableSet,
        record: Record,
        segment: u64,
    ) -> Result<bool> {
        let mut flushed = false;
        loop {
            match memtables.add(record.clone()) {
                Ok(()) => {
                    memtables.note_wal_segment(segment);
                    return Ok(flushed);
                }
                Err(MemtableError::Full) => {
                    if let Some(records) = memtables.pending_flush() {
                        flushed |= self.flush_table(&records)?;
                    }
                    tracing::debug!(from = memtables.current_index(), "rotating memtable");
                    memtables.rotate();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes `records` as a new level-1 table and publishes it. Returns
    /// `false` for an empty batch. Must be called with the memtable lock
    /// held so readers find the records either in a memtable or in a
    /// published table.
    pub(crate) fn flush_table(&self, records: &[Record]) -> Result<bool> {
        if records.is_empty() {
            return Ok(false);
        }
        let label = self.labels.next()?;
        let info = write_table(&self.level_dir(1), label, 1, records, &self.table_options)?;
        let table = Arc::new(SSTable::open(&info.toc_path, &self.read_keys)?);
        tracing::info!(label, records = info.records, bytes = info.data_size, "flushed memtable");

        {
            let mut levels = self.levels.write();
            levels.insert(1, table);
            self.generation.fetch_add(1, Ordering::AcqRel);
        }

        let mut cache = self.cache.lock();
        for record in records {
            if let Ok(key) = std::str::from_utf8(&record.key) {
                cache.refresh(key, record);
            }
        }
        Ok(true)
    }

    /// Purges WAL segments no memtable depends on any more and runs a
    /// compaction pass. With every memtable empty the WAL moves on to a
    /// fresh segment first.
    ///
    /// Purge and compaction failures are logged, not returned; the next
    /// flush or [`compact`](Engine::compact) retries them.
    pub(crate) fn after_flush(&self, wal: &mut Wal) -> Result<()> {
        let pinned = self.memtables.read().min_wal_segment();
        let floor = match pinned {
            Some(segment) => segment,
            None => wal.roll()?,
        };
        if let Err(e) = wal.purge_segments_before(floor) {
            tracing::warn!(error = %e, below = floor, "wal purge failed");
        }
        if let Err(e) = self.run_compaction() {
            tracing::warn!(error = %e, "compaction after flush failed");
        }
        Ok(())
    }
}
