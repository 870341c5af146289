//! Cold start: WAL replay into the memtables.
//!
//! `Engine::open` has already loaded the levels, restored the label counter
//! and started a fresh WAL segment. Every older segment is replayed here in
//! order; memtables that fill up are flushed exactly as on the live write
//! path, and segments no memtable depends on afterwards are purged.

use memtable::Record;
use wal::Wal;

use crate::{Engine, Result};

impl Engine {
    pub(crate) fn recover_wal(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        let current = wal.current_segment();
        let dir = wal.dir().to_path_buf();

        let mut failure = None;
        let mut flushed = false;
        let replayed = Wal::replay(&dir, |segment, record: Record| {
            if failure.is_some() || segment >= current {
                return;
            }
            self.clock.observe(record.timestamp);
            let mut memtables = self.memtables.write();
            match self.add_to_memtables(&mut memtables, record, segment) {
                Ok(f) => flushed |= f,
                Err(e) => failure = Some(e),
            }
        })?;
        if let Some(e) = failure {
            return Err(e);
        }

        if flushed {
            self.after_flush(&mut wal)?;
        } else {
            let floor = self.memtables.read().min_wal_segment().unwrap_or(current);
            wal.purge_segments_before(floor)?;
        }
        if replayed > 0 {
            tracing::info!(records = replayed, "replayed wal");
        }
        Ok(())
    }
}
