//! # SSTable - Sorted String Table
//!
//! Immutable on-disk tables produced by memtable flushes and compaction.
//! A table is a group of blocks, each in its own file or all back-to-back
//! in one `-SSTable.db` file:
//!
//! ```text
//! L001/
//! ├── TOC/usertable-7-TOC.txt      block locations; publishes the table
//! ├── usertable-7-Data.db          every record, ascending by key
//! ├── usertable-7-Index.db         sparse key -> data offset
//! ├── usertable-7-Summary.db       key range + sparse index sample
//! ├── usertable-7-Filter.db        bloom filter over every key
//! └── usertable-7-Metadata.txt     record counts, max timestamp, sizes
//! ```
//!
//! A point lookup checks the filter and the key range, binary-searches the
//! summary for an index segment, scans that segment for the closest data
//! offset, and walks the data block from there. Every data record carries a
//! CRC32 that is verified on each read.
//!
//! The TOC is written last (temp file + rename); a table without a TOC does
//! not exist. Removal deletes the TOC first.
//!
//! See [`format`] for the byte layouts.

pub mod format;

mod dictionary;
mod merge;
mod reader;
mod writer;

pub use dictionary::{KeyCodec, KeyDictionary};
pub use format::{Component, TableMetadata, Toc};
pub use merge::{merge_tables, MergeIterator, RecordSource, VecSource};
pub use reader::{SSTable, TableCursor};
pub use writer::{write_table, TableInfo, TableOptions, TableWriter};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Checksum mismatch or an impossible length inside a block.
    #[error("corrupt table data in {} at offset {offset}", path.display())]
    Corruption { path: PathBuf, offset: u64 },

    #[error("invalid table {}: {reason}", path.display())]
    InvalidToc { path: PathBuf, reason: String },

    /// A table must hold at least one record.
    #[error("refusing to write an empty table")]
    Empty,
}

pub type Result<T> = std::result::Result<T, SSTableError>;

#[cfg(test)]
mod tests;
