//! Records which listing and publication URLs have been fully processed, so a
//! restarted run can skip them without walking their pages again.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use log::info;
use serde::{Deserialize, Serialize};

use crate::cache::write_atomically;
use crate::config::CacheConfig;
use crate::constants::CACHE_FORMAT_VERSION;
use crate::error::CacheError;

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    completed: BTreeSet<String>,
}

#[derive(Debug)]
pub struct ProgressCheckpoint {
    path: PathBuf,
    completed: BTreeSet<String>,
    dirty: bool,
}

impl ProgressCheckpoint {
    /// # Errors
    ///
    /// Returns an error if an existing checkpoint cannot be read.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::open_at(config.checkpoint_path())
    }

    /// # Errors
    ///
    /// Returns an error if an existing checkpoint cannot be read.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let completed = if path.is_file() {
            let file: CheckpointFile = serde_json::from_slice(&fs::read(&path)?)?;
            if file.version != CACHE_FORMAT_VERSION {
                return Err(CacheError::UnsupportedVersion(file.version));
            }
            file.completed
        } else {
            BTreeSet::new()
        };

        Ok(Self {
            path,
            completed,
            dirty: false,
        })
    }

    pub fn is_done(&self, url: &str) -> bool {
        self.completed.contains(url)
    }

    pub fn mark_done(&mut self, url: &str) {
        self.dirty |= self.completed.insert(url.to_owned());
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Writes the checkpoint if anything changed since the last flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        let file = CheckpointFile {
            version: CACHE_FORMAT_VERSION,
            completed: self.completed.clone(),
        };
        write_atomically(&self.path, &serde_json::to_vec_pretty(&file)?)?;
        self.dirty = false;
        info!("Saved progress checkpoint with {} entries", self.completed.len());
        Ok(())
    }
}
