use bloom::BloomFilter;
use memtable::Record;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::dictionary::KeyCodec;
use crate::format::{decode_samples, read_data_record, BlockRef, Summary, TableMetadata, Toc};
use crate::merge::RecordSource;
use crate::{Result, SSTableError};

/// An open, immutable table.
///
/// Summary, filter and metadata are held in memory; the Data and Index
/// blocks are read on demand through handles guarded by a mutex, so `get`
/// works through `&self`. Cursors open handles of their own.
pub struct SSTable {
    toc_path: PathBuf,
    level_dir: PathBuf,
    toc: Toc,
    meta: TableMetadata,
    /// Decoded to plain keys.
    summary: Summary,
    filter: BloomFilter,
    keys: KeyCodec,
    data_path: PathBuf,
    data: Mutex<File>,
    index: Mutex<File>,
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("label", &self.meta.label)
            .field("level", &self.meta.level)
            .field("records", &self.meta.records)
            .field("toc_path", &self.toc_path)
            .finish()
    }
}

impl SSTable {
    /// Opens the table published by `toc_path` (`<level_dir>/TOC/...`).
    ///
    /// `keys` is only consulted when the table's metadata says its keys are
    /// dictionary-encoded.
    pub fn open<P: AsRef<Path>>(toc_path: P, keys: &KeyCodec) -> Result<Self> {
        let toc_path = toc_path.as_ref().to_path_buf();
        let invalid = |reason: &str| SSTableError::InvalidToc {
            path: toc_path.clone(),
            reason: reason.to_string(),
        };

        let toc = Toc::parse(&fs::read_to_string(&toc_path)?, &toc_path)?;
        let level_dir = toc_path
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| invalid("toc is not inside a level directory"))?
            .to_path_buf();

        let meta_path = level_dir.join(&toc.metadata);
        let meta = TableMetadata::parse(&fs::read_to_string(&meta_path)?, &meta_path)?;
        if meta.data_size != toc.data.size {
            return Err(invalid("metadata and toc disagree on data size"));
        }
        let keys = match (meta.compressed, keys) {
            (false, _) => KeyCodec::Plain,
            (true, KeyCodec::Dictionary(_)) => keys.clone(),
            (true, KeyCodec::Plain) => {
                return Err(invalid("keys are dictionary-encoded but no dictionary is loaded"))
            }
        };

        let (summary_path, summary_bytes) = read_block(&level_dir, &toc.summary)?;
        let raw = Summary::decode(&summary_bytes, &summary_path, toc.summary.offset)?;
        let decode = |stored: Vec<u8>| keys.decode(stored, &summary_path, toc.summary.offset);
        let summary = Summary {
            start_key: decode(raw.start_key)?,
            end_key: decode(raw.end_key)?,
            samples: raw
                .samples
                .into_iter()
                .map(|(k, off)| -> Result<(Vec<u8>, u64)> { Ok((decode(k)?, off)) })
                .collect::<Result<_>>()?,
        };
        if summary.samples.is_empty() {
            return Err(SSTableError::Corruption {
                path: summary_path,
                offset: toc.summary.offset,
            });
        }

        let (filter_path, filter_bytes) = read_block(&level_dir, &toc.filter)?;
        let filter = BloomFilter::decode(&filter_bytes).map_err(|_| SSTableError::Corruption {
            path: filter_path,
            offset: toc.filter.offset,
        })?;

        let data_path = level_dir.join(&toc.data.file);
        let data = File::open(&data_path)?;
        let index = File::open(level_dir.join(&toc.index.file))?;

        Ok(Self {
            toc_path,
            level_dir,
            toc,
            meta,
            summary,
            filter,
            keys,
            data_path,
            data: Mutex::new(data),
            index: Mutex::new(index),
        })
    }

    /// Point lookup. Tombstones are returned as records.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        if !self.may_contain(key) {
            return Ok(None);
        }
        let Some(mut pos) = self.locate(key)? else {
            return Ok(None);
        };

        let mut file = self.data.lock();
        file.seek(SeekFrom::Start(self.toc.data.offset + pos))?;
        let mut rdr = BufReader::new(&mut *file);
        while pos < self.toc.data.size {
            let at = self.toc.data.offset + pos;
            let (mut record, len) = read_data_record(&mut rdr, &self.data_path, at)?;
            record.key = self.keys.decode(record.key, &self.data_path, at)?;
            match record.key.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => return Ok(Some(record)),
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => pos += len,
            }
        }
        Ok(None)
    }

    /// Filter and key-range check; `false` means the key is certainly absent.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.covers(key) && self.filter.may_contain(key)
    }

    /// Data offset of the last index entry at or before `key`, or `None`
    /// if `key` sorts before the table.
    fn locate(&self, key: &[u8]) -> Result<Option<u64>> {
        let samples = &self.summary.samples;
        let n = samples.partition_point(|(k, _)| k.as_slice() <= key);
        if n == 0 {
            return Ok(None);
        }
        let seg_start = samples[n - 1].1;
        let seg_end = samples.get(n).map_or(self.toc.index.size, |s| s.1);
        if seg_end < seg_start || seg_end > self.toc.index.size {
            return Err(SSTableError::Corruption {
                path: self.level_dir.join(&self.toc.index.file),
                offset: self.toc.index.offset + seg_start,
            });
        }

        let base = self.toc.index.offset + seg_start;
        let mut bytes = vec![0u8; (seg_end - seg_start) as usize];
        {
            let mut file = self.index.lock();
            file.seek(SeekFrom::Start(base))?;
            file.read_exact(&mut bytes)?;
        }
        let index_path = self.level_dir.join(&self.toc.index.file);
        let mut best = None;
        for (stored, offset) in decode_samples(&bytes, &index_path, base)? {
            let entry_key = self.keys.decode(stored, &index_path, base)?;
            if entry_key.as_slice() > key {
                break;
            }
            best = Some(offset);
        }
        Ok(best)
    }

    /// Cursor positioned at the first record with key `>= from`, or at the
    /// start of the table.
    pub fn cursor(&self, from: Option<&[u8]>) -> Result<TableCursor> {
        let start = match from {
            Some(key) => self.locate(key)?.unwrap_or(0),
            None => 0,
        };
        let mut file = File::open(&self.data_path)?;
        file.seek(SeekFrom::Start(self.toc.data.offset + start))?;

        let mut cursor = TableCursor {
            path: self.data_path.clone(),
            rdr: BufReader::new(file),
            keys: self.keys.clone(),
            pos: self.toc.data.offset + start,
            end: self.toc.data.offset + self.toc.data.size,
            current: None,
        };
        cursor.advance()?;
        if let Some(key) = from {
            while cursor.value().is_some_and(|r| r.key.as_slice() < key) {
                cursor.advance()?;
            }
        }
        Ok(cursor)
    }

    /// Every record, in key order.
    pub fn records(&self) -> Result<Vec<Record>> {
        let mut cursor = self.cursor(None)?;
        let mut out = Vec::with_capacity(self.meta.records as usize);
        while let Some(record) = cursor.take() {
            out.push(record);
            cursor.advance()?;
        }
        Ok(out)
    }

    /// Unpublishes the table (TOC first) and removes its files.
    pub fn delete_files(&self) -> Result<()> {
        remove_if_exists(&self.toc_path)?;
        for name in self.toc.files() {
            remove_if_exists(&self.level_dir.join(name))?;
        }
        tracing::debug!(label = self.meta.label, level = self.meta.level, "removed table");
        Ok(())
    }

    #[must_use]
    pub fn label(&self) -> u64 {
        self.meta.label
    }

    #[must_use]
    pub fn level(&self) -> usize {
        self.meta.level
    }

    #[must_use]
    pub fn start_key(&self) -> &[u8] {
        &self.summary.start_key
    }

    #[must_use]
    pub fn end_key(&self) -> &[u8] {
        &self.summary.end_key
    }

    /// `key` lies inside the table's closed key range.
    #[must_use]
    pub fn covers(&self, key: &[u8]) -> bool {
        self.start_key() <= key && key <= self.end_key()
    }

    /// Closed ranges `[start, end]` and the table's range intersect.
    #[must_use]
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        self.start_key() <= end && start <= self.end_key()
    }

    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.meta
    }

    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.meta.data_size
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.meta.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meta.records == 0
    }

    #[must_use]
    pub fn toc_path(&self) -> &Path {
        &self.toc_path
    }
}

fn read_block(level_dir: &Path, block: &BlockRef) -> Result<(PathBuf, Vec<u8>)> {
    let path = level_dir.join(&block.file);
    let mut file = File::open(&path)?;
    file.seek(SeekFrom::Start(block.offset))?;
    let mut bytes = vec![0u8; block.size as usize];
    file.read_exact(&mut bytes).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SSTableError::Corruption {
                path: path.clone(),
                offset: block.offset,
            }
        } else {
            e.into()
        }
    })?;
    Ok((path, bytes))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Sequential reader over a table's Data block with its own file handle.
pub struct TableCursor {
    path: PathBuf,
    rdr: BufReader<File>,
    keys: KeyCodec,
    /// Absolute offset of the next unread record.
    pos: u64,
    end: u64,
    current: Option<Record>,
}

impl TableCursor {
    /// Moves the current record out, leaving the cursor without a value
    /// until the next [`advance`](RecordSource::advance).
    pub fn take(&mut self) -> Option<Record> {
        self.current.take()
    }
}

impl RecordSource for TableCursor {
    fn value(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<bool> {
        if self.pos >= self.end {
            self.current = None;
            return Ok(false);
        }
        let at = self.pos;
        let (mut record, len) = read_data_record(&mut self.rdr, &self.path, at)?;
        record.key = self.keys.decode(record.key, &self.path, at)?;
        self.pos += len;
        self.current = Some(record);
        Ok(true)
    }
}
