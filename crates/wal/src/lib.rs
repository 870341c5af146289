//! # WAL - Write-Ahead Log
//!
//! Every mutation is serialized and appended to the log **before** the
//! memtable is touched. On restart the log is replayed to rebuild the
//! memtables, so no acknowledged write is lost.
//!
//! The log is a directory of numbered segment files:
//!
//! ```text
//! <data_dir>/wal/wal_00000000.log
//! <data_dir>/wal/wal_00000001.log
//! ...
//! ```
//!
//! ## Record format (little-endian)
//!
//! ```text
//! [crc32: u32][timestamp: u64][tombstone: u8][key_len: u64][val_len: u64][key][value]
//! ```
//!
//! The CRC32 covers every byte after itself. A record never straddles two
//! segments: a segment is closed once the next record would push it past the
//! configured size.
//!
//! ## Example
//!
//! ```rust,no_run
//! use config::WalConfig;
//! use wal::Wal;
//!
//! let mut wal = Wal::open("data/wal", &WalConfig::default()).unwrap();
//! wal.put_commit(b"hello", b"world", 1).unwrap();
//! drop(wal);
//!
//! Wal::replay("data/wal", |_segment, rec| println!("{:?}", rec)).unwrap();
//! ```

mod writer;

pub use writer::Wal;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::Record;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Bytes preceding the key: crc + timestamp + tombstone + key_len + val_len.
pub const RECORD_HEADER_BYTES: usize = 4 + 8 + 1 + 8 + 8;

/// Largest key or value accepted while decoding (64 MiB). Guards against
/// allocating from a corrupt length field.
const MAX_FIELD_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed its CRC check or carried impossible lengths.
    #[error("corrupt wal record at offset {offset}")]
    Corrupt { offset: u64 },
}

/// Appends the encoded form of `record` to `buf`.
pub fn encode_record(record: &Record, buf: &mut Vec<u8>) {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    // Writes into a Vec are infallible.
    let _ = buf.write_u64::<LittleEndian>(record.timestamp);
    let _ = buf.write_u8(u8::from(record.tombstone));
    let _ = buf.write_u64::<LittleEndian>(record.key.len() as u64);
    let _ = buf.write_u64::<LittleEndian>(record.value.len() as u64);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let mut hasher = Crc32::new();
    hasher.update(&buf[start + 4..]);
    buf[start..start + 4].copy_from_slice(&hasher.finalize().to_le_bytes());
}

/// Size of `record` once encoded.
#[must_use]
pub fn encoded_len(record: &Record) -> u64 {
    (RECORD_HEADER_BYTES + record.key.len() + record.value.len()) as u64
}

/// Sequential reader over one segment (or any byte stream).
///
/// A record cut short by the end of the stream (a crash mid-append) ends
/// the replay cleanly; everything before it is still delivered.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
    offset: u64,
}

impl WalReader<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        Ok(Self::from_reader(File::open(path)?))
    }
}

impl<R: Read> WalReader<R> {
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
            offset: 0,
        }
    }

    /// Calls `apply` for every complete record.
    ///
    /// Returns `true` if the stream ended exactly on a record boundary and
    /// `false` if a truncated tail was skipped.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<bool, WalError>
    where
        F: FnMut(Record),
    {
        let mut header = [0u8; RECORD_HEADER_BYTES];
        let mut payload = Vec::with_capacity(256);

        loop {
            // A clean EOF lands exactly on a record boundary.
            match self.rdr.read(&mut header[..1]) {
                Ok(0) => return Ok(true),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            if !read_or_eof(&mut self.rdr, &mut header[1..])? {
                return Ok(false);
            }

            let mut h = &header[..];
            let crc = h.read_u32::<LittleEndian>()?;
            let timestamp = h.read_u64::<LittleEndian>()?;
            let tombstone = h.read_u8()?;
            let key_len = h.read_u64::<LittleEndian>()?;
            let val_len = h.read_u64::<LittleEndian>()?;

            if tombstone > 1 || key_len > MAX_FIELD_BYTES || val_len > MAX_FIELD_BYTES {
                return Err(WalError::Corrupt {
                    offset: self.offset,
                });
            }

            payload.clear();
            payload.resize((key_len + val_len) as usize, 0);
            if !read_or_eof(&mut self.rdr, &mut payload)? {
                return Ok(false);
            }

            let mut hasher = Crc32::new();
            hasher.update(&header[4..]);
            hasher.update(&payload);
            if hasher.finalize() != crc {
                return Err(WalError::Corrupt {
                    offset: self.offset,
                });
            }

            let value = payload.split_off(key_len as usize);
            let key = std::mem::take(&mut payload);
            self.offset += (RECORD_HEADER_BYTES + key.len() + value.len()) as u64;

            apply(Record {
                key,
                value,
                tombstone: tombstone == 1,
                timestamp,
            });
        }
    }
}

/// `read_exact` that reports a short read as `Ok(false)`.
fn read_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool, WalError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests;
