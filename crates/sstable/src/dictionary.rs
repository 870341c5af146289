//! Persistent key -> id dictionary used for key compression.
//!
//! The file is append-only: entry `n` (`[key_len: u64][key]`) is the key
//! with id `n`. Ids are assigned on first use and never change.

use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Result, SSTableError};

#[derive(Debug, Default)]
struct Entries {
    ids: HashMap<Vec<u8>, u64>,
    keys: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct KeyDictionary {
    path: PathBuf,
    entries: RwLock<Entries>,
    file: parking_lot::Mutex<File>,
}

impl KeyDictionary {
    /// Loads the dictionary at `path`, creating an empty one if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Entries::default();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let Some(len_bytes) = bytes.get(pos..pos + 8) else {
                break;
            };
            let mut len = [0u8; 8];
            len.copy_from_slice(len_bytes);
            let end = usize::try_from(u64::from_le_bytes(len))
                .ok()
                .and_then(|len| (pos + 8).checked_add(len))
                .ok_or_else(|| SSTableError::Corruption {
                    path: path.clone(),
                    offset: pos as u64,
                })?;
            let Some(key) = bytes.get(pos + 8..end) else {
                break;
            };
            entries.ids.insert(key.to_vec(), entries.keys.len() as u64);
            entries.keys.push(key.to_vec());
            pos = end;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if pos < bytes.len() {
            // Torn final entry. Published tables only reference synced ids.
            tracing::warn!(
                path = %path.display(),
                offset = pos,
                dropped = bytes.len() - pos,
                "truncated dictionary tail"
            );
            file.set_len(pos as u64)?;
        }
        Ok(Self {
            path,
            entries: RwLock::new(entries),
            file: parking_lot::Mutex::new(file),
        })
    }

    /// Id of `key`, assigning and persisting a new one on first sight.
    pub fn id_for(&self, key: &[u8]) -> Result<u64> {
        if let Some(&id) = self.entries.read().ids.get(key) {
            return Ok(id);
        }

        let mut entries = self.entries.write();
        if let Some(&id) = entries.ids.get(key) {
            return Ok(id);
        }
        let mut buf = Vec::with_capacity(8 + key.len());
        buf.write_u64::<LittleEndian>(key.len() as u64)?;
        buf.extend_from_slice(key);
        {
            let mut file = self.file.lock();
            let committed = file.metadata()?.len();
            if let Err(e) = file.write_all(&buf) {
                let _ = file.set_len(committed);
                return Err(e.into());
            }
        }

        let id = entries.keys.len() as u64;
        entries.keys.push(key.to_vec());
        entries.ids.insert(key.to_vec(), id);
        Ok(id)
    }

    #[must_use]
    pub fn key_for(&self, id: u64) -> Option<Vec<u8>> {
        self.entries.read().keys.get(id as usize).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forces appended entries to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// How keys are stored inside table blocks.
#[derive(Debug, Clone, Default)]
pub enum KeyCodec {
    #[default]
    Plain,
    /// Keys are replaced by their 8-byte little-endian dictionary id.
    Dictionary(Arc<KeyDictionary>),
}

impl KeyCodec {
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        matches!(self, KeyCodec::Dictionary(_))
    }

    pub(crate) fn encode(&self, key: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyCodec::Plain => Ok(key.to_vec()),
            KeyCodec::Dictionary(dict) => Ok(dict.id_for(key)?.to_le_bytes().to_vec()),
        }
    }

    /// Makes every id handed out so far durable.
    pub(crate) fn sync(&self) -> Result<()> {
        match self {
            KeyCodec::Plain => Ok(()),
            KeyCodec::Dictionary(dict) => dict.sync(),
        }
    }

    pub(crate) fn decode(&self, stored: Vec<u8>, path: &Path, offset: u64) -> Result<Vec<u8>> {
        match self {
            KeyCodec::Plain => Ok(stored),
            KeyCodec::Dictionary(dict) => {
                let corrupt = || SSTableError::Corruption {
                    path: path.to_path_buf(),
                    offset,
                };
                let id: [u8; 8] = stored.as_slice().try_into().map_err(|_| corrupt())?;
                dict.key_for(u64::from_le_bytes(id)).ok_or_else(corrupt)
            }
        }
    }
}
