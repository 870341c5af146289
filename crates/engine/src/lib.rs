//! # Engine - embedded LSM key-value store
//!
//! Ties the [`memtable`], [`wal`] and [`sstable`] crates together.
//!
//! ## Architecture
//!
//! ```text
//! put / delete
//!   |
//!   v
//! WAL append ──> MemtableSet (ring of N memtables)
//!                   |
//!                   | current memtable full: rotate; a wrapped slot
//!                   | is flushed to a new level-1 table
//!                   v
//!                L001 ──compaction──> L002 ──> ... ──> L<max_level>
//!
//! get:   memtables -> LRU cache -> L001 -> L002 -> ...  (first level hit wins)
//! scans: k-way merge over memtable snapshots and table cursors
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `lib.rs`       | `Engine`, `open`, `close`, errors, reserved keys     |
//! | [`recovery`]   | WAL replay, clock recovery, WAL segment purge        |
//! | [`write`]      | `put`, `delete`, `flush`, memtable rotation          |
//! | [`read`]       | `get` through memtables, cache and levels            |
//! | [`scan`]       | range/prefix scans, paging, lazy iterators           |
//! | [`levels`]     | level directories, TOC discovery, labels             |
//! | [`compaction`] | size-tiered and leveled compaction                   |
//! | [`cache`]      | LRU read cache                                       |
//! | [`clock`]      | monotonic write timestamps                           |
//!
//! ## Crash Safety
//!
//! Every write reaches the WAL before its memtable. A table becomes visible
//! only once its TOC is renamed into place, and source tables of a
//! compaction are deleted only after the output is published. WAL segments
//! are purged once every record in them lives in a table.
//!
//! ## Concurrency
//!
//! All methods take `&self`. Writers serialize on the WAL mutex; readers
//! take shared locks on the memtables and the level layout and then work
//! on cloned `Arc<SSTable>` handles.

mod cache;
mod clock;
mod compaction;
mod levels;
mod read;
mod recovery;
mod scan;
mod write;

pub use config::{CompactionStrategy, EngineConfig, MemtableKind};
pub use memtable::Record;
pub use scan::ScanIterator;

use cache::LruCache;
use clock::Clock;
use config::ConfigError;
use levels::{LabelAllocator, Levels};
use memtable::{MemtableError, MemtableSet};
use parking_lot::{Mutex, RwLock};
use sstable::{KeyCodec, KeyDictionary, SSTableError, TableOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use thiserror::Error;
use wal::{Wal, WalError};

/// Key prefixes owned by collaborators (filters, sketches, rate limiter
/// state). They read and write through `put`/`get`; scans never show them.
pub const RESERVED_PREFIXES: [&str; 5] = [
    "__bloom__/",
    "__cms__/",
    "__hll__/",
    "__simhash__/",
    "__ratelimit__/",
];

/// `true` if `key` lives under one of [`RESERVED_PREFIXES`].
#[must_use]
pub fn is_reserved(key: &[u8]) -> bool {
    RESERVED_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix.as_bytes()))
}

pub(crate) const WAL_DIR: &str = "wal";
pub(crate) const DICTIONARY_FILE: &str = "dictionary.db";

#[derive(Debug, Error)]
pub enum Error {
    /// A memtable had no room; handled internally by rotation.
    #[error("memtable capacity exhausted")]
    Capacity,

    /// Memtable-level delete of an absent key; handled internally.
    #[error("key not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<WalError> for Error {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(e) => Error::Io(e),
            e @ WalError::Corrupt { .. } => Error::Corruption(e.to_string()),
        }
    }
}

impl From<SSTableError> for Error {
    fn from(e: SSTableError) -> Self {
        match e {
            SSTableError::Io(e) => Error::Io(e),
            e @ (SSTableError::Corruption { .. } | SSTableError::InvalidToc { .. }) => {
                Error::Corruption(e.to_string())
            }
            SSTableError::Empty => Error::InvalidArgument("table would be empty".into()),
        }
    }
}

impl From<MemtableError> for Error {
    fn from(e: MemtableError) -> Self {
        match e {
            MemtableError::Full => Error::Capacity,
            MemtableError::NotFound => Error::NotFound,
        }
    }
}

/// The storage engine. Share it across threads with `Arc<Engine>`.
pub struct Engine {
    pub(crate) config: EngineConfig,
    /// Options for tables this engine writes.
    pub(crate) table_options: TableOptions,
    /// Codec for tables this engine reads; may carry a dictionary even when
    /// new tables are written uncompressed.
    pub(crate) read_keys: KeyCodec,

    /// Serializes writers; held across WAL append, memtable mutation and
    /// any flush or compaction the write triggers.
    pub(crate) wal: Mutex<Wal>,
    pub(crate) memtables: RwLock<MemtableSet>,
    pub(crate) levels: RwLock<Levels>,
    pub(crate) cache: Mutex<LruCache>,
    /// Bumped whenever a flush publishes a table; guards cache fills.
    pub(crate) generation: AtomicU64,

    pub(crate) labels: LabelAllocator,
    pub(crate) clock: Clock,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let memtables = self.memtables.read();
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("memtable_kind", &self.config.memtable.kind)
            .field("memtable_entries", &memtables.len())
            .field("memtable_instances", &memtables.instances())
            .field("strategy", &self.config.compaction.strategy)
            .field("level_table_counts", &self.levels.read().table_counts())
            .field("cache_entries", &self.cache.lock().len())
            .finish()
    }
}

impl Engine {
    /// Opens (or creates) the store in `config.data_dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Validate the configuration and create the data directory.
    /// 2. Load the key dictionary if one exists or compression is enabled.
    /// 3. Per level: drop unpublished files, open every table its TOCs list.
    /// 4. Restore the label counter and the clock from what was found.
    /// 5. Start a new WAL segment and replay the older ones into the
    ///    memtables, flushing as they fill.
    /// 6. Purge WAL segments no memtable depends on.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let dictionary_path = config.data_dir.join(DICTIONARY_FILE);
        let dictionary = if config.table.compress_keys || dictionary_path.exists() {
            Some(Arc::new(KeyDictionary::open(&dictionary_path)?))
        } else {
            None
        };
        let read_keys = dictionary
            .clone()
            .map_or(KeyCodec::Plain, KeyCodec::Dictionary);
        let write_keys = if config.table.compress_keys {
            read_keys.clone()
        } else {
            KeyCodec::Plain
        };

        let levels = Levels::load(&config, &read_keys)?;
        let labels = LabelAllocator::open(&config.data_dir, levels.max_label())?;
        let clock = Clock::new();
        clock.observe(levels.max_timestamp());

        let wal = Wal::open(config.data_dir.join(WAL_DIR), &config.wal)?;

        let engine = Self {
            table_options: TableOptions::from_config(&config.table, write_keys),
            read_keys,
            wal: Mutex::new(wal),
            memtables: RwLock::new(MemtableSet::from_config(&config.memtable)),
            levels: RwLock::new(levels),
            cache: Mutex::new(LruCache::new(config.cache.capacity)),
            generation: AtomicU64::new(0),
            labels,
            clock,
            config,
        };
        engine.recover_wal()?;

        tracing::info!(
            data_dir = %engine.config.data_dir.display(),
            tables = engine.levels.read().table_count(),
            memtable_entries = engine.memtables.read().len(),
            "opened engine"
        );
        Ok(engine)
    }

    /// Flushes every memtable, syncs the WAL and releases the store.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        self.wal.lock().sync()?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "closed engine");
        Ok(())
    }

    /// Number of tables per level, index 0 being level 1.
    #[must_use]
    pub fn level_table_counts(&self) -> Vec<usize> {
        self.levels.read().table_counts()
    }

    /// Total Data block bytes per level, index 0 being level 1.
    #[must_use]
    pub fn level_sizes(&self) -> Vec<u64> {
        self.levels.read().data_sizes()
    }

    /// Records currently buffered in memtables.
    #[must_use]
    pub fn memtable_len(&self) -> usize {
        self.memtables.read().len()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub(crate) fn level_dir(&self, level: usize) -> PathBuf {
        levels::level_dir(&self.config.data_dir, level)
    }
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
