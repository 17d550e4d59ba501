//! The cache module keeps fetched archive pages on disk so that a crawl can be
//! replayed or resumed without touching the network again.
//!
//! Two pieces live here: [`PersistentFetchCache`], the `url → id` index, and
//! [`BodyStore`], one gzip container per id holding the raw page body.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::constants::{BODY_ENTRY_NAME, CACHE_FORMAT_VERSION};
use crate::error::CacheError;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    entries: HashMap<String, u64>,
}

/// Maps URLs to dense, stable ids. The whole map is held in memory.
#[derive(Debug)]
pub struct PersistentFetchCache {
    path: PathBuf,
    entries: HashMap<String, u64>,
    save_frequency: u64,
    commits_since_flush: u64,
}

impl PersistentFetchCache {
    /// Loads the index of `config`, starting empty when none was saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the index exists but cannot be read or has an unknown version.
    pub fn open(config: &CacheConfig, save_frequency: u64) -> Result<Self, CacheError> {
        Self::open_at(config.index_path(), save_frequency)
    }

    /// Loads the index stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or has an unknown version.
    pub fn open_at(path: impl Into<PathBuf>, save_frequency: u64) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = if path.is_file() {
            let index: IndexFile = serde_json::from_slice(&fs::read(&path)?)?;
            if index.version != CACHE_FORMAT_VERSION {
                return Err(CacheError::UnsupportedVersion(index.version));
            }
            index.entries
        } else {
            HashMap::new()
        };

        debug!("Loaded {} cache entries from {}", entries.len(), path.display());

        Ok(Self {
            path,
            entries,
            save_frequency: save_frequency.max(1),
            commits_since_flush: 0,
        })
    }

    /// Returns the id of `url` and whether it still has to be committed.
    pub fn get_or_assign(&self, url: &str) -> (u64, bool) {
        match self.entries.get(url) {
            Some(id) => (*id, false),
            None => (self.next_id(), true),
        }
    }

    pub fn is_committed(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Records the id handed out by [`Self::get_or_assign`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::DuplicateKey`] if `url` was committed before,
    /// [`CacheError::IdMismatch`] if `id` is not the next dense id, or an i/o
    /// error if the periodic flush fails.
    pub fn commit(&mut self, url: &str, id: u64) -> Result<(), CacheError> {
        if self.entries.contains_key(url) {
            return Err(CacheError::DuplicateKey {
                url: url.to_owned(),
            });
        }
        let expected = self.next_id();
        if id != expected {
            return Err(CacheError::IdMismatch {
                url: url.to_owned(),
                expected,
                got: id,
            });
        }

        self.entries.insert(url.to_owned(), id);
        self.commits_since_flush += 1;
        if self.commits_since_flush >= self.save_frequency {
            self.flush()?;
        }

        Ok(())
    }

    /// Durably replaces the index file with the in-memory map.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be written or renamed.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        let index = IndexFile {
            version: CACHE_FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        write_atomically(&self.path, &serde_json::to_vec(&index)?)?;
        self.commits_since_flush = 0;
        info!("Saved cache index with {} entries", self.entries.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_id(&self) -> u64 {
        self.entries.len() as u64 + 1
    }
}

/// Stores page bodies as `<id>.gz` containers under one directory.
///
/// The gzip header names the entry [`BODY_ENTRY_NAME`] and carries the source
/// URL as its comment.
#[derive(Debug, Clone)]
pub struct BodyStore {
    dir: PathBuf,
}

impl BodyStore {
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::open_at(config.bodies_dir())
    }

    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_at(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn exists(&self, id: u64) -> bool {
        self.path_of(id).is_file()
    }

    /// Writes `body` under `id`, replacing any previous container.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the atomic rename fails.
    pub fn store(&self, id: u64, url: &str, body: &str) -> Result<(), CacheError> {
        let mut encoder = GzBuilder::new()
            .filename(BODY_ENTRY_NAME)
            .comment(url)
            .write(Vec::new(), Compression::default());
        encoder.write_all(body.as_bytes())?;
        let compressed = encoder.finish()?;
        write_atomically(&self.path_of(id), &compressed)
    }

    /// # Errors
    ///
    /// Returns [`CacheError::MissingBody`] if nothing is stored under `id`.
    pub fn load(&self, id: u64) -> Result<String, CacheError> {
        self.read_container(id).map(|(_, body)| body)
    }

    /// Returns the URL recorded in the container header of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MissingBody`] if nothing is stored under `id`.
    pub fn source_url(&self, id: u64) -> Result<Option<String>, CacheError> {
        self.read_container(id).map(|(url, _)| url)
    }

    fn read_container(&self, id: u64) -> Result<(Option<String>, String), CacheError> {
        let path = self.path_of(id);
        if !path.is_file() {
            return Err(CacheError::MissingBody(id));
        }
        let mut decoder = GzDecoder::new(File::open(path)?);
        let mut body = String::new();
        decoder.read_to_string(&mut body)?;
        let url = decoder
            .header()
            .and_then(|header| header.comment())
            .map(|comment| String::from_utf8_lossy(comment).into_owned());
        Ok((url, body))
    }

    fn path_of(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.gz"))
    }
}

/// Writes `bytes` to a sibling temp file and renames it over `path`, so readers
/// only ever see the previous or the new content.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
