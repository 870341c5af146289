//! # Config - engine configuration
//!
//! Typed configuration for every tunable of the storage engine, grouped into
//! one section per subsystem. A config can be built in code (starting from
//! [`EngineConfig::default`]), parsed from TOML, and then adjusted through
//! environment variables.
//!
//! ```toml
//! data_dir = "data"
//!
//! [memtable]
//! kind = "skip_list"
//! capacity = 1024
//! instances = 2
//!
//! [compaction]
//! strategy = "leveled"
//! max_level = 4
//! ```
//!
//! ## Environment overrides
//!
//! ```text
//! LSMKV_DATA_DIR            data directory
//! LSMKV_MEMTABLE_KIND       b_tree | skip_list | hash_map
//! LSMKV_MEMTABLE_CAPACITY   entries per memtable
//! LSMKV_WAL_SYNC            fsync every WAL append (true/false)
//! LSMKV_COMPACTION          size_tiered | leveled
//! LSMKV_CACHE_CAPACITY      read cache entries (0 disables)
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// A configuration value that failed validation or parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which ordered map structure backs each memtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemtableKind {
    BTree,
    SkipList,
    HashMap,
}

impl FromStr for MemtableKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "b_tree" | "btree" => Ok(Self::BTree),
            "skip_list" | "skiplist" => Ok(Self::SkipList),
            "hash_map" | "hashmap" => Ok(Self::HashMap),
            other => Err(ConfigError::Invalid(format!(
                "unknown memtable kind '{}' (expected b_tree, skip_list or hash_map)",
                other
            ))),
        }
    }
}

/// How table files are merged across levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    SizeTiered,
    Leveled,
}

impl FromStr for CompactionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "size_tiered" | "size-tiered" => Ok(Self::SizeTiered),
            "leveled" => Ok(Self::Leveled),
            other => Err(ConfigError::Invalid(format!(
                "unknown compaction strategy '{}' (expected size_tiered or leveled)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemtableConfig {
    pub kind: MemtableKind,
    /// Maximum number of distinct keys per memtable.
    pub capacity: usize,
    /// Number of memtables in the rotating set.
    pub instances: usize,
    /// Minimum degree `t` of the B-tree (nodes hold `t-1..=2t-1` keys).
    pub btree_degree: usize,
    pub skiplist_max_height: usize,
}

impl Default for MemtableConfig {
    fn default() -> Self {
        Self {
            kind: MemtableKind::SkipList,
            capacity: 1024,
            instances: 1,
            btree_degree: 8,
            skiplist_max_height: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Segment size in bytes before a new segment file is opened.
    pub segment_size: u64,
    /// Records buffered in memory before they are appended to the segment.
    pub buffer_records: usize,
    /// `fsync` after every append.
    pub sync: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_size: 4 * 1024 * 1024,
            buffer_records: 1,
            sync: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Every `index_degree`-th data record gets an index entry.
    pub index_degree: usize,
    /// Every `summary_degree`-th index entry gets a summary entry.
    pub summary_degree: usize,
    pub filter_fpr: f64,
    /// Store all blocks in one `-SSTable.db` file instead of one file each.
    pub single_file: bool,
    /// Replace keys with dictionary ids inside table blocks.
    pub compress_keys: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            index_degree: 16,
            summary_degree: 8,
            filter_fpr: 0.01,
            single_file: false,
            compress_keys: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub strategy: CompactionStrategy,
    /// Deepest level; it is never compacted further.
    pub max_level: usize,
    /// Table count that triggers size-tiered compaction of a level, and
    /// leveled compaction of level 1.
    pub max_tables_per_level: usize,
    /// Leveled: maximum data bytes of level 2. Level `n` may hold
    /// `first_level_size * fanout^(n-2)` bytes.
    pub first_level_size: u64,
    pub fanout: u64,
    /// Leveled: approximate data bytes per output table.
    pub target_table_size: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            strategy: CompactionStrategy::SizeTiered,
            max_level: 4,
            max_tables_per_level: 4,
            first_level_size: 8 * 1024 * 1024,
            fanout: 10,
            target_table_size: 2 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached records; 0 disables the cache.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory holding levels, WAL segments and engine metadata.
    pub data_dir: PathBuf,
    pub memtable: MemtableConfig,
    pub wal: WalConfig,
    pub table: TableConfig,
    pub compaction: CompactionConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            memtable: MemtableConfig::default(),
            wal: WalConfig::default(),
            table: TableConfig::default(),
            compaction: CompactionConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in config {}", path.display()))
    }

    /// Applies `LSMKV_*` environment variables on top of the current values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup, so callers and tests do
    /// not have to mutate the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("LSMKV_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(kind) = lookup("LSMKV_MEMTABLE_KIND") {
            self.memtable.kind = kind.parse()?;
        }
        if let Some(cap) = lookup("LSMKV_MEMTABLE_CAPACITY") {
            self.memtable.capacity = parse_number("LSMKV_MEMTABLE_CAPACITY", &cap)?;
        }
        if let Some(sync) = lookup("LSMKV_WAL_SYNC") {
            self.wal.sync = sync.parse().map_err(|_| {
                ConfigError::Invalid(format!("LSMKV_WAL_SYNC: expected true/false, got '{}'", sync))
            })?;
        }
        if let Some(strategy) = lookup("LSMKV_COMPACTION") {
            self.compaction.strategy = strategy.parse()?;
        }
        if let Some(cap) = lookup("LSMKV_CACHE_CAPACITY") {
            self.cache.capacity = parse_number("LSMKV_CACHE_CAPACITY", &cap)?;
        }
        self.validate()
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.memtable;
        ensure(m.capacity >= 1, "memtable.capacity must be >= 1")?;
        ensure(m.instances >= 1, "memtable.instances must be >= 1")?;
        ensure(m.btree_degree >= 2, "memtable.btree_degree must be >= 2")?;
        ensure(
            (1..=32).contains(&m.skiplist_max_height),
            "memtable.skiplist_max_height must be in 1..=32",
        )?;

        ensure(self.wal.segment_size >= 64, "wal.segment_size must be >= 64 bytes")?;
        ensure(self.wal.buffer_records >= 1, "wal.buffer_records must be >= 1")?;

        let t = &self.table;
        ensure(t.index_degree >= 1, "table.index_degree must be >= 1")?;
        ensure(t.summary_degree >= 1, "table.summary_degree must be >= 1")?;
        ensure(
            t.filter_fpr > 0.0 && t.filter_fpr < 1.0,
            "table.filter_fpr must be in (0, 1)",
        )?;

        let c = &self.compaction;
        ensure(c.max_level >= 1, "compaction.max_level must be >= 1")?;
        ensure(
            c.max_tables_per_level >= 2,
            "compaction.max_tables_per_level must be >= 2",
        )?;
        ensure(c.first_level_size >= 1, "compaction.first_level_size must be >= 1")?;
        ensure(c.fanout >= 2, "compaction.fanout must be >= 2")?;
        ensure(c.target_table_size >= 1, "compaction.target_table_size must be >= 1")?;
        Ok(())
    }

    /// Maximum data bytes of a leveled `level` (>= 2); `None` for level 1,
    /// which is bounded by table count, and for the unbounded last level.
    #[must_use]
    pub fn level_size_limit(&self, level: usize) -> Option<u64> {
        let c = &self.compaction;
        if level < 2 || level >= c.max_level {
            return None;
        }
        let exp = u32::try_from(level - 2).unwrap_or(u32::MAX);
        Some(c.first_level_size.saturating_mul(c.fanout.saturating_pow(exp)))
    }
}

fn ensure(cond: bool, msg: &str) -> Result<(), ConfigError> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::Invalid(msg.to_string()))
    }
}

fn parse_number(var: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}: expected a number, got '{}'", var, raw)))
}
