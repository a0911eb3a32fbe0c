//! Resume cache: the durable set of addresses already known complete.
//!
//! Shared across workers behind a single mutex; the membership test and the
//! conditional add are each one atomic operation, so no worker ever observes
//! a partially-updated set. The file format is a single JSON object with an
//! `addresses` array, written wholesale via temp-file-and-rename so a crash
//! mid-persist never truncates the previous cache.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::Address;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cache file is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
    #[error("failed to replace cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Serialize, Deserialize, Default)]
struct CacheFile {
    addresses: Vec<String>,
}

/// Mutex-guarded set of completed addresses.
pub struct ResumeCache {
    entries: Mutex<HashSet<Address>>,
}

impl ResumeCache {
    pub fn new() -> Self {
        ResumeCache {
            entries: Mutex::new(HashSet::new()),
        }
    }

    /// Load the cache from `path`. A missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            debug!(path = %path.display(), "no resume cache file, starting empty");
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path)?;
        let file: CacheFile = serde_json::from_str(&raw)?;
        let entries = file
            .addresses
            .iter()
            .map(|s| Address::new(s))
            .collect::<HashSet<_>>();
        debug!(count = entries.len(), "loaded resume cache");
        Ok(ResumeCache {
            entries: Mutex::new(entries),
        })
    }

    /// Atomically overwrite the cache file with the current set.
    ///
    /// Entries are sorted so persisting an unchanged set is byte-stable.
    pub fn persist(&self, path: &Path) -> Result<(), CacheError> {
        let mut addresses: Vec<String> = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.iter().map(|a| a.as_str().to_string()).collect()
        };
        addresses.sort();

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &CacheFile { addresses })?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(path)?;
        Ok(())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(address)
    }

    /// Add an address, returning whether it was newly inserted.
    pub fn insert(&self, address: Address) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the entries, for status reporting.
    pub fn snapshot(&self) -> Vec<Address> {
        let mut entries: Vec<Address> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        entries.sort();
        entries
    }
}

impl Default for ResumeCache {
    fn default() -> Self {
        Self::new()
    }
}
