//! Block codecs, file naming, TOC and metadata text formats.
//!
//! ## Data record
//!
//! ```text
//! [crc32: u32][timestamp: u64][tombstone: u8][key_len: u64]
//! [val_len: u64 if !tombstone][key][value if !tombstone]
//! ```
//!
//! ## Index entry
//!
//! ```text
//! [key_len: u64][key][data_offset: u64]
//! ```
//!
//! ## Summary
//!
//! ```text
//! [start_len: u64][start_key][end_len: u64][end_key]
//! then index samples: [key_len: u64][key][index_offset: u64] ...
//! ```
//!
//! ## TOC
//!
//! Four `<offset> <size> <file>` lines (Data, Index, Summary, Filter) and a
//! final line naming the metadata file. File names are relative to the
//! level directory.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::Record;
use std::fmt::Write as _;
use std::io::{self, Read};
use std::path::Path;

use crate::{Result, SSTableError};

pub const TABLE_PREFIX: &str = "usertable";
pub const TOC_DIR: &str = "TOC";

/// Largest key or value accepted while decoding (64 MiB).
const MAX_FIELD_BYTES: u64 = 64 * 1024 * 1024;

/// One on-disk piece of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Data,
    Index,
    Summary,
    Filter,
    Toc,
    Metadata,
    /// All four blocks back-to-back.
    Single,
}

impl Component {
    fn suffix(self) -> &'static str {
        match self {
            Component::Data => "Data.db",
            Component::Index => "Index.db",
            Component::Summary => "Summary.db",
            Component::Filter => "Filter.db",
            Component::Toc => "TOC.txt",
            Component::Metadata => "Metadata.txt",
            Component::Single => "SSTable.db",
        }
    }
}

/// `usertable-<label>-<suffix>`
#[must_use]
pub fn file_name(label: u64, component: Component) -> String {
    format!("{TABLE_PREFIX}-{label}-{}", component.suffix())
}

/// Extracts the label from any table file name.
#[must_use]
pub fn parse_label(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(TABLE_PREFIX)?.strip_prefix('-')?;
    let (label, _) = rest.split_once('-')?;
    label.parse().ok()
}

/// Label of a TOC file name, `None` for anything else.
#[must_use]
pub fn parse_toc_label(name: &str) -> Option<u64> {
    if name.ends_with(Component::Toc.suffix()) {
        parse_label(name)
    } else {
        None
    }
}

// -------------------- Data records --------------------

/// Appends the framed form of `record` to `buf`, storing `key` in place of
/// `record.key` (the two differ when keys are dictionary-encoded).
pub(crate) fn encode_data_record(key: &[u8], record: &Record, buf: &mut Vec<u8>) {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);
    let _ = buf.write_u64::<LittleEndian>(record.timestamp);
    let _ = buf.write_u8(u8::from(record.tombstone));
    let _ = buf.write_u64::<LittleEndian>(key.len() as u64);
    if !record.tombstone {
        let _ = buf.write_u64::<LittleEndian>(record.value.len() as u64);
    }
    buf.extend_from_slice(key);
    if !record.tombstone {
        buf.extend_from_slice(&record.value);
    }

    let mut hasher = Crc32::new();
    hasher.update(&buf[start + 4..]);
    buf[start..start + 4].copy_from_slice(&hasher.finalize().to_le_bytes());
}

/// Reads one data record starting at `offset`, verifying its checksum.
///
/// The returned record carries the key exactly as stored. The second value
/// is the encoded length.
pub(crate) fn read_data_record<R: Read>(
    r: &mut R,
    path: &Path,
    offset: u64,
) -> Result<(Record, u64)> {
    let corrupt = || SSTableError::Corruption {
        path: path.to_path_buf(),
        offset,
    };
    let map_io = |e: io::Error| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            corrupt()
        } else {
            SSTableError::Io(e)
        }
    };

    let mut header = [0u8; 4 + 8 + 1 + 8];
    r.read_exact(&mut header).map_err(map_io)?;
    let mut h = &header[..];
    let crc = h.read_u32::<LittleEndian>()?;
    let timestamp = h.read_u64::<LittleEndian>()?;
    let tombstone = h.read_u8()?;
    let key_len = h.read_u64::<LittleEndian>()?;
    if tombstone > 1 || key_len > MAX_FIELD_BYTES {
        return Err(corrupt());
    }

    let mut hasher = Crc32::new();
    hasher.update(&header[4..]);

    let val_len = if tombstone == 0 {
        let mut len = [0u8; 8];
        r.read_exact(&mut len).map_err(map_io)?;
        hasher.update(&len);
        let len = u64::from_le_bytes(len);
        if len > MAX_FIELD_BYTES {
            return Err(corrupt());
        }
        len
    } else {
        0
    };

    let mut key = vec![0u8; key_len as usize];
    r.read_exact(&mut key).map_err(map_io)?;
    let mut value = vec![0u8; val_len as usize];
    r.read_exact(&mut value).map_err(map_io)?;
    hasher.update(&key);
    hasher.update(&value);
    if hasher.finalize() != crc {
        return Err(corrupt());
    }

    let len = header.len() as u64
        + if tombstone == 0 { 8 } else { 0 }
        + key_len
        + val_len;
    Ok((
        Record {
            key,
            value,
            tombstone: tombstone == 1,
            timestamp,
        },
        len,
    ))
}

// -------------------- Index & summary --------------------

pub(crate) fn encode_sample(key: &[u8], offset: u64, buf: &mut Vec<u8>) {
    let _ = buf.write_u64::<LittleEndian>(key.len() as u64);
    buf.extend_from_slice(key);
    let _ = buf.write_u64::<LittleEndian>(offset);
}

/// Decodes a run of `[key_len][key][offset]` entries. `base` is the file
/// offset of `bytes[0]`, used for error reporting.
pub(crate) fn decode_samples(bytes: &[u8], path: &Path, base: u64) -> Result<Vec<(Vec<u8>, u64)>> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let at = base + (bytes.len() - rest.len()) as u64;
        let corrupt = || SSTableError::Corruption {
            path: path.to_path_buf(),
            offset: at,
        };
        let key = read_sized(&mut rest).ok_or_else(corrupt)?;
        let offset = rest.read_u64::<LittleEndian>().map_err(|_| corrupt())?;
        out.push((key, offset));
    }
    Ok(out)
}

fn read_sized(rest: &mut &[u8]) -> Option<Vec<u8>> {
    let len = rest.read_u64::<LittleEndian>().ok()?;
    if len > rest.len() as u64 {
        return None;
    }
    let (key, tail) = rest.split_at(len as usize);
    *rest = tail;
    Some(key.to_vec())
}

/// Key range of a table plus a sparse sample of its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    /// `(key, offset into the Index block)`, ascending.
    pub samples: Vec<(Vec<u8>, u64)>,
}

impl Summary {
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        let _ = buf.write_u64::<LittleEndian>(self.start_key.len() as u64);
        buf.extend_from_slice(&self.start_key);
        let _ = buf.write_u64::<LittleEndian>(self.end_key.len() as u64);
        buf.extend_from_slice(&self.end_key);
        for (key, offset) in &self.samples {
            encode_sample(key, *offset, buf);
        }
    }

    pub(crate) fn decode(bytes: &[u8], path: &Path, base: u64) -> Result<Self> {
        let corrupt = || SSTableError::Corruption {
            path: path.to_path_buf(),
            offset: base,
        };
        let mut rest = bytes;
        let start_key = read_sized(&mut rest).ok_or_else(corrupt)?;
        let end_key = read_sized(&mut rest).ok_or_else(corrupt)?;
        let consumed = (bytes.len() - rest.len()) as u64;
        let samples = decode_samples(rest, path, base + consumed)?;
        Ok(Self {
            start_key,
            end_key,
            samples,
        })
    }
}

// -------------------- TOC --------------------

/// Location of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub offset: u64,
    pub size: u64,
    pub file: String,
}

/// Table of contents: the single source of truth for a table's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toc {
    pub data: BlockRef,
    pub index: BlockRef,
    pub summary: BlockRef,
    pub filter: BlockRef,
    pub metadata: String,
}

impl Toc {
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for block in [&self.data, &self.index, &self.summary, &self.filter] {
            let _ = writeln!(out, "{} {} {}", block.offset, block.size, block.file);
        }
        let _ = writeln!(out, "{}", self.metadata);
        out
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let invalid = |reason: String| SSTableError::InvalidToc {
            path: path.to_path_buf(),
            reason,
        };

        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.len() != 5 {
            return Err(invalid(format!("expected 5 lines, found {}", lines.len())));
        }

        let mut blocks = Vec::with_capacity(4);
        for line in &lines[..4] {
            let mut parts = line.splitn(3, ' ');
            let (Some(offset), Some(size), Some(file)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(invalid(format!("malformed block line {line:?}")));
            };
            let offset = offset
                .parse()
                .map_err(|_| invalid(format!("bad offset in {line:?}")))?;
            let size = size
                .parse()
                .map_err(|_| invalid(format!("bad size in {line:?}")))?;
            blocks.push(BlockRef {
                offset,
                size,
                file: file.to_string(),
            });
        }

        let mut blocks = blocks.into_iter();
        let mut next = || blocks.next().ok_or_else(|| invalid("missing block".into()));
        Ok(Self {
            data: next()?,
            index: next()?,
            summary: next()?,
            filter: next()?,
            metadata: lines[4].to_string(),
        })
    }

    /// Distinct files referenced, metadata included.
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::with_capacity(5);
        for name in [
            self.data.file.as_str(),
            self.index.file.as_str(),
            self.summary.file.as_str(),
            self.filter.file.as_str(),
            self.metadata.as_str(),
        ] {
            if !files.contains(&name) {
                files.push(name);
            }
        }
        files
    }
}

// -------------------- Metadata --------------------

/// Summary statistics kept beside each table as `key=value` lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMetadata {
    pub label: u64,
    pub level: usize,
    pub records: u64,
    pub tombstones: u64,
    pub max_timestamp: u64,
    /// Size of the Data block in bytes.
    pub data_size: u64,
    /// Keys are stored as dictionary ids.
    pub compressed: bool,
}

impl TableMetadata {
    #[must_use]
    pub fn to_text(&self) -> String {
        format!(
            "label={}\nlevel={}\nrecords={}\ntombstones={}\nmax_timestamp={}\ndata_size={}\ncompressed={}\n",
            self.label,
            self.level,
            self.records,
            self.tombstones,
            self.max_timestamp,
            self.data_size,
            self.compressed,
        )
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let invalid = |reason: String| SSTableError::InvalidToc {
            path: path.to_path_buf(),
            reason,
        };
        fn num<T: std::str::FromStr>(v: &str) -> Option<T> {
            v.parse().ok()
        }

        let mut meta = TableMetadata::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed metadata line {line:?}")))?;
            let bad = || invalid(format!("bad value for {key}: {value:?}"));
            match key {
                "label" => meta.label = num(value).ok_or_else(bad)?,
                "level" => meta.level = num(value).ok_or_else(bad)?,
                "records" => meta.records = num(value).ok_or_else(bad)?,
                "tombstones" => meta.tombstones = num(value).ok_or_else(bad)?,
                "max_timestamp" => meta.max_timestamp = num(value).ok_or_else(bad)?,
                "data_size" => meta.data_size = num(value).ok_or_else(bad)?,
                "compressed" => meta.compressed = num(value).ok_or_else(bad)?,
                // Unknown keys are tolerated so newer writers stay readable.
                _ => {}
            }
        }
        Ok(meta)
    }
}
