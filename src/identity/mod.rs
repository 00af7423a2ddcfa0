//! Client-local state: the dedup fingerprint and per-poll "already voted"
//! markers, kept in a small key-value store handed in by the caller.

use log::warn;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::models::Fingerprint;

pub const FINGERPRINT_KEY: &str = "lv_fp";

pub fn voted_key(poll_id: &str) -> String {
    format!("voted_{}", poll_id)
}

#[derive(Error, Debug)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    fn remove(&self, key: &str) -> Result<(), KvError>;
}

#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Key-value store persisted as one JSON object on disk.
pub struct FileKv {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileKv {
    /// Loads the file if it exists. A missing file starts empty; an unreadable
    /// one is logged and also starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable client state {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("Failed to read client state {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), KvError> {
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        self.persist(&entries)
    }
}

/// Hands out this client's fingerprint, creating it on first use.
#[derive(Clone)]
pub struct IdentityTagger {
    kv: Arc<dyn KvStore>,
}

impl IdentityTagger {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Never fails. If the fresh fingerprint cannot be stored, it is still
    /// returned, and the next call will mint another one.
    pub fn get_or_create_fingerprint(&self) -> Fingerprint {
        if let Some(stored) = self.kv.get(FINGERPRINT_KEY) {
            match Fingerprint::parse(&stored) {
                Ok(fingerprint) => return fingerprint,
                Err(_) => warn!("Discarding malformed stored fingerprint"),
            }
        }

        let fingerprint = Fingerprint::generate();
        if let Err(e) = self.kv.set(FINGERPRINT_KEY, fingerprint.as_str()) {
            warn!("Could not persist fingerprint, dedup will be weaker: {}", e);
        }
        fingerprint
    }
}
