use crate::{encode_record, encoded_len, WalError, WalReader};
use config::WalConfig;
use memtable::Record;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const SEGMENT_PREFIX: &str = "wal_";
const SEGMENT_SUFFIX: &str = ".log";

/// Segmented, optionally buffered WAL writer.
///
/// Every `open` starts a fresh segment after the highest one on disk, so a
/// possibly torn tail left by a crash is never appended to.
pub struct Wal {
    dir: PathBuf,
    segment_size: u64,
    buffer_records: usize,
    sync: bool,
    file: File,
    segment: u64,
    segment_bytes: u64,
    /// Encoded records not yet written, and the length of each.
    buf: Vec<u8>,
    pending: Vec<usize>,
}

impl Wal {
    pub fn open<P: AsRef<Path>>(dir: P, config: &WalConfig) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let segment = Self::segments(&dir)?
            .last()
            .map_or(0, |(index, _)| index + 1);
        let file = create_segment(&dir, segment)?;
        tracing::debug!(segment, dir = %dir.display(), "opened wal");

        Ok(Self {
            dir,
            segment_size: config.segment_size.max(1),
            buffer_records: config.buffer_records.max(1),
            sync: config.sync,
            file,
            segment,
            segment_bytes: 0,
            buf: Vec::with_capacity(256),
            pending: Vec::new(),
        })
    }

    /// Logs a put of `key` -> `value`.
    pub fn put_commit(&mut self, key: &[u8], value: &[u8], timestamp: u64) -> Result<(), WalError> {
        self.append(&Record::put(key, value, timestamp))
    }

    /// Logs a delete of `key`. `value` is carried for symmetry with
    /// [`put_commit`](Self::put_commit) and normally empty.
    pub fn delete_commit(
        &mut self,
        key: &[u8],
        value: &[u8],
        timestamp: u64,
    ) -> Result<(), WalError> {
        self.append(&Record {
            key: key.to_vec(),
            value: value.to_vec(),
            tombstone: true,
            timestamp,
        })
    }

    /// Buffers `record`, writing the buffer out once it holds
    /// `buffer_records` records.
    pub fn append(&mut self, record: &Record) -> Result<(), WalError> {
        let len = encoded_len(record) as usize;
        encode_record(record, &mut self.buf);
        self.pending.push(len);

        if self.pending.len() >= self.buffer_records {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Writes every buffered record, rotating segments on the way.
    ///
    /// On failure the buffer is dropped: those writes were never durable.
    pub fn flush_buffer(&mut self) -> Result<(), WalError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let buf = std::mem::take(&mut self.buf);
        let pending = std::mem::take(&mut self.pending);
        let result = self.write_records(&buf, &pending);

        self.buf = buf;
        self.buf.clear();
        self.pending = pending;
        self.pending.clear();
        result
    }

    fn write_records(&mut self, buf: &[u8], lens: &[usize]) -> Result<(), WalError> {
        let mut start = 0;
        let mut end = 0;
        for &len in lens {
            let len64 = len as u64;
            let in_segment = self.segment_bytes + (end - start) as u64;
            if in_segment > 0 && in_segment + len64 > self.segment_size {
                self.write_chunk(&buf[start..end])?;
                self.rotate()?;
                start = end;
            }
            end += len;
        }
        self.write_chunk(&buf[start..end])
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), WalError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.write_out(chunk) {
            self.discard_torn_write();
            return Err(e);
        }
        self.segment_bytes += chunk.len() as u64;
        Ok(())
    }

    fn write_out(&mut self, chunk: &[u8]) -> Result<(), WalError> {
        self.file.write_all(chunk)?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cuts the segment back to its last whole record after a failed write,
    /// or moves on to a fresh segment if it cannot be cut.
    pub(crate) fn discard_torn_write(&mut self) {
        let Err(e) = self.file.set_len(self.segment_bytes) else {
            return;
        };
        tracing::warn!(segment = self.segment, error = %e, "cannot truncate torn wal write");
        if let Err(e) = self.rotate() {
            tracing::warn!(segment = self.segment, error = %e, "cannot rotate past torn wal write");
        }
    }

    fn rotate(&mut self) -> Result<(), WalError> {
        if self.sync {
            self.file.sync_all()?;
        }
        let next = self.segment + 1;
        self.file = create_segment(&self.dir, next)?;
        tracing::debug!(from = self.segment, to = next, "rotated wal segment");
        self.segment = next;
        self.segment_bytes = 0;
        Ok(())
    }

    /// Starts a new segment unless the current one is still empty, so that
    /// everything logged so far can be purged. Returns the segment now
    /// being written.
    pub fn roll(&mut self) -> Result<u64, WalError> {
        self.flush_buffer()?;
        if self.segment_bytes > 0 {
            self.rotate()?;
        }
        Ok(self.segment)
    }

    /// Writes out the buffer and fsyncs the current segment.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.flush_buffer()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Index of the segment the next record will most likely land in.
    #[must_use]
    pub fn current_segment(&self) -> u64 {
        self.segment
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deletes every segment with an index below `index`. The current
    /// segment is never removed. Returns how many files were deleted.
    pub fn purge_segments_before(&mut self, index: u64) -> Result<usize, WalError> {
        let bound = index.min(self.segment);
        let mut removed = 0;
        for (segment, path) in Self::segments(&self.dir)? {
            if segment >= bound {
                break;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            tracing::info!(removed, below = bound, "purged wal segments");
        }
        Ok(removed)
    }

    /// Segment files in `dir`, ascending by index. A missing directory has
    /// no segments.
    pub fn segments<P: AsRef<Path>>(dir: P) -> Result<Vec<(u64, PathBuf)>, WalError> {
        let entries = match fs::read_dir(dir.as_ref()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(index) = name.to_str().and_then(parse_segment_name) {
                out.push((index, entry.path()));
            }
        }
        out.sort_unstable_by_key(|(index, _)| *index);
        Ok(out)
    }

    /// Replays every segment in `dir` in write order, passing each record
    /// together with the index of the segment holding it.
    ///
    /// Returns the number of records replayed.
    pub fn replay<P, F>(dir: P, mut apply: F) -> Result<u64, WalError>
    where
        P: AsRef<Path>,
        F: FnMut(u64, Record),
    {
        let mut count = 0;
        for (segment, path) in Self::segments(dir)? {
            let mut reader = WalReader::open(&path)?;
            let clean = reader.replay(|record| {
                count += 1;
                apply(segment, record);
            })?;
            if !clean {
                tracing::warn!(segment, path = %path.display(), "ignoring truncated wal tail");
            }
        }
        Ok(count)
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        if let Err(e) = self.flush_buffer() {
            tracing::warn!(error = %e, "failed to flush wal buffer on drop");
        }
    }
}

fn segment_name(index: u64) -> String {
    format!("{SEGMENT_PREFIX}{index:08}{SEGMENT_SUFFIX}")
}

fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

fn create_segment(dir: &Path, index: u64) -> Result<File, WalError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(segment_name(index)))?;
    Ok(file)
}
