use bloom::BloomFilter;
use config::TableConfig;
use memtable::Record;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::dictionary::KeyCodec;
use crate::format::{
    encode_data_record, encode_sample, file_name, BlockRef, Component, Summary, TableMetadata,
    Toc, TOC_DIR,
};
use crate::{Result, SSTableError};

/// Knobs for writing and reading tables.
#[derive(Debug, Clone)]
pub struct TableOptions {
    /// Every n-th data record gets an index entry.
    pub index_degree: usize,
    /// Every n-th index entry gets a summary sample.
    pub summary_degree: usize,
    pub filter_fpr: f64,
    pub single_file: bool,
    pub keys: KeyCodec,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self::from_config(&TableConfig::default(), KeyCodec::Plain)
    }
}

impl TableOptions {
    #[must_use]
    pub fn from_config(config: &TableConfig, keys: KeyCodec) -> Self {
        Self {
            index_degree: config.index_degree.max(1),
            summary_degree: config.summary_degree.max(1),
            filter_fpr: config.filter_fpr,
            single_file: config.single_file,
            keys,
        }
    }
}

/// What a finished write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub label: u64,
    pub level: usize,
    pub toc_path: PathBuf,
    pub records: u64,
    pub data_size: u64,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

/// Streaming table writer.
///
/// Records are pushed one at a time in strictly ascending key order and go
/// straight to the Data block; only the sparse index and the filter stay in
/// memory. Nothing is visible to readers until [`finish`](Self::finish)
/// publishes the TOC. A writer dropped before that removes its files.
pub struct TableWriter {
    level_dir: PathBuf,
    label: u64,
    level: usize,
    options: TableOptions,

    data_name: String,
    data: BufWriter<File>,
    data_size: u64,
    created: Vec<PathBuf>,

    /// Sampled `(stored key, data offset)` pairs.
    index: Vec<(Vec<u8>, u64)>,
    /// Last record, if it was not sampled.
    pending_last: Option<(Vec<u8>, u64)>,
    start_key: Option<Vec<u8>>,
    end_key: Vec<u8>,
    filter: BloomFilter,

    records: u64,
    tombstones: u64,
    max_timestamp: u64,
    buf: Vec<u8>,
    finished: bool,
}

impl TableWriter {
    /// Starts table `label` in `level_dir`. `expected_records` sizes the
    /// filter; over-estimating is harmless.
    pub fn create<P: AsRef<Path>>(
        level_dir: P,
        label: u64,
        level: usize,
        expected_records: usize,
        options: TableOptions,
    ) -> Result<Self> {
        let level_dir = level_dir.as_ref().to_path_buf();
        fs::create_dir_all(level_dir.join(TOC_DIR))?;

        let component = if options.single_file {
            Component::Single
        } else {
            Component::Data
        };
        let data_name = file_name(label, component);
        let data_path = level_dir.join(&data_name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&data_path)?;

        Ok(Self {
            level_dir,
            label,
            level,
            filter: BloomFilter::new(expected_records.max(1), options.filter_fpr),
            options,
            data_name,
            data: BufWriter::new(file),
            data_size: 0,
            created: vec![data_path],
            index: Vec::new(),
            pending_last: None,
            start_key: None,
            end_key: Vec::new(),
            records: 0,
            tombstones: 0,
            max_timestamp: 0,
            buf: Vec::with_capacity(256),
            finished: false,
        })
    }

    /// Appends `record`. Keys must arrive in strictly ascending order.
    pub fn push(&mut self, record: &Record) -> Result<()> {
        debug_assert!(
            self.start_key.is_none() || record.key > self.end_key,
            "table keys must be strictly ascending"
        );

        let stored = self.options.keys.encode(&record.key)?;
        let offset = self.data_size;
        self.buf.clear();
        encode_data_record(&stored, record, &mut self.buf);
        self.data.write_all(&self.buf)?;
        self.data_size += self.buf.len() as u64;

        if self.records % self.options.index_degree as u64 == 0 {
            self.index.push((stored, offset));
            self.pending_last = None;
        } else {
            self.pending_last = Some((stored, offset));
        }

        self.filter.insert(&record.key);
        if self.start_key.is_none() {
            self.start_key = Some(record.key.clone());
        }
        self.end_key.clone_from(&record.key);
        self.records += 1;
        if record.tombstone {
            self.tombstones += 1;
        }
        self.max_timestamp = self.max_timestamp.max(record.timestamp);
        Ok(())
    }

    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Bytes written to the Data block so far.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    #[must_use]
    pub fn label(&self) -> u64 {
        self.label
    }

    /// Writes the remaining blocks and publishes the table.
    pub fn finish(mut self) -> Result<TableInfo> {
        let Some(start_key) = self.start_key.clone() else {
            return Err(SSTableError::Empty);
        };
        if let Some(last) = self.pending_last.take() {
            self.index.push(last);
        }

        // Index block, remembering where each entry starts.
        let mut index_block = Vec::new();
        let mut summary_samples = Vec::new();
        for (i, (key, offset)) in self.index.iter().enumerate() {
            if i % self.options.summary_degree == 0 {
                summary_samples.push((key.clone(), index_block.len() as u64));
            }
            encode_sample(key, *offset, &mut index_block);
        }

        let summary = Summary {
            start_key: self.options.keys.encode(&start_key)?,
            end_key: self.options.keys.encode(&self.end_key)?,
            samples: summary_samples,
        };
        let mut summary_block = Vec::new();
        summary.encode(&mut summary_block);
        let filter_block = self.filter.encode();

        let data = BlockRef {
            offset: 0,
            size: self.data_size,
            file: self.data_name.clone(),
        };
        let (index, summary, filter) = if self.options.single_file {
            let mut at = self.data_size;
            let mut append = |bytes: &[u8], data: &mut BufWriter<File>| -> Result<BlockRef> {
                data.write_all(bytes)?;
                let block = BlockRef {
                    offset: at,
                    size: bytes.len() as u64,
                    file: self.data_name.clone(),
                };
                at += bytes.len() as u64;
                Ok(block)
            };
            let index = append(&index_block, &mut self.data)?;
            let summary = append(&summary_block, &mut self.data)?;
            let filter = append(&filter_block, &mut self.data)?;
            (index, summary, filter)
        } else {
            (
                self.write_block(Component::Index, &index_block)?,
                self.write_block(Component::Summary, &summary_block)?,
                self.write_block(Component::Filter, &filter_block)?,
            )
        };
        self.data.flush()?;
        self.data.get_ref().sync_all()?;

        self.options.keys.sync()?;

        let metadata = TableMetadata {
            label: self.label,
            level: self.level,
            records: self.records,
            tombstones: self.tombstones,
            max_timestamp: self.max_timestamp,
            data_size: self.data_size,
            compressed: self.options.keys.is_compressed(),
        };
        let metadata_name = file_name(self.label, Component::Metadata);
        let metadata_path = self.level_dir.join(&metadata_name);
        self.created.push(metadata_path.clone());
        write_synced(&metadata_path, metadata.to_text().as_bytes())?;

        let toc = Toc {
            data,
            index,
            summary,
            filter,
            metadata: metadata_name,
        };
        let toc_dir = self.level_dir.join(TOC_DIR);
        let toc_path = toc_dir.join(file_name(self.label, Component::Toc));
        let tmp_path = toc_path.with_extension("txt.tmp");
        self.created.push(tmp_path.clone());
        write_synced(&tmp_path, toc.to_text().as_bytes())?;
        fs::rename(&tmp_path, &toc_path)?;
        if let Ok(dir) = File::open(&toc_dir) {
            let _ = dir.sync_all();
        }
        self.finished = true;

        tracing::debug!(
            label = self.label,
            level = self.level,
            records = self.records,
            data_size = self.data_size,
            "wrote table"
        );

        Ok(TableInfo {
            label: self.label,
            level: self.level,
            toc_path,
            records: self.records,
            data_size: self.data_size,
            start_key,
            end_key: std::mem::take(&mut self.end_key),
        })
    }

    fn write_block(&mut self, component: Component, bytes: &[u8]) -> Result<BlockRef> {
        let name = file_name(self.label, component);
        let path = self.level_dir.join(&name);
        self.created.push(path.clone());
        write_synced(&path, bytes)?;
        Ok(BlockRef {
            offset: 0,
            size: bytes.len() as u64,
            file: name,
        })
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for path in &self.created {
            let _ = fs::remove_file(path);
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Writes `records` (ascending by key) as table `label` in one go.
pub fn write_table<'a, I>(
    level_dir: &Path,
    label: u64,
    level: usize,
    records: I,
    options: &TableOptions,
) -> Result<TableInfo>
where
    I: IntoIterator<Item = &'a Record>,
    I::IntoIter: ExactSizeIterator,
{
    let records = records.into_iter();
    let mut writer = TableWriter::create(level_dir, label, level, records.len(), options.clone())?;
    for record in records {
        writer.push(record)?;
    }
    writer.finish()
}
