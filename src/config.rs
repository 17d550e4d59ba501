//! Explicit configuration values handed to each component at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::FragmentPolicy;
use crate::constants::{
    BATCH_SHRINK_FACTOR, BODIES_DIR, CACHE_INDEX_FILE, CAPTCHA_SELECTOR, CAPTCHA_TIMEOUT_SECS,
    CHECKPOINT_FILE, DEFAULT_CACHE_DIR, DEFAULT_NAMESPACE, DEFAULT_SAVE_FREQUENCY,
    INITIAL_BATCH_SIZE, MARKER_SELECTOR, MARKER_TIMEOUT_SECS, MAX_FETCH_ATTEMPTS,
    MINIMUM_BATCH_SIZE, POLL_INTERVAL_MILLIS, USER_AGENT,
};

/// Where cached pages and checkpoints of one ingestion command live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub base_dir: PathBuf,
    pub namespace: String,
}

impl CacheConfig {
    pub fn new(base_dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            namespace: namespace.into(),
        }
    }

    pub fn namespace_dir(&self) -> PathBuf {
        self.base_dir.join(&self.namespace)
    }

    pub fn index_path(&self) -> PathBuf {
        self.namespace_dir().join(CACHE_INDEX_FILE)
    }

    pub fn bodies_dir(&self) -> PathBuf {
        self.namespace_dir().join(BODIES_DIR)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.namespace_dir().join(CHECKPOINT_FILE)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Path::new(DEFAULT_CACHE_DIR), DEFAULT_NAMESPACE)
    }
}

/// Retry, timeout and DOM marker settings of the fault tolerant fetcher.
#[derive(Clone, Debug)]
pub struct FetchConfig {
    /// Failed attempts tolerated before a fetch becomes fatal.
    pub max_attempts: u32,
    /// Hand captchas to the solving service instead of waiting for an operator.
    pub auto_solve_captcha: bool,
    /// Ceiling for one captcha solve.
    pub captcha_timeout: Duration,
    /// Ceiling for the post-captcha marker to show up.
    pub marker_timeout: Duration,
    pub poll_interval: Duration,
    pub captcha_selector: String,
    pub marker_selector: String,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_FETCH_ATTEMPTS,
            auto_solve_captcha: true,
            captcha_timeout: Duration::from_secs(CAPTCHA_TIMEOUT_SECS),
            marker_timeout: Duration::from_secs(MARKER_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(POLL_INTERVAL_MILLIS),
            captcha_selector: CAPTCHA_SELECTOR.to_owned(),
            marker_selector: MARKER_SELECTOR.to_owned(),
            user_agent: USER_AGENT.to_owned(),
        }
    }
}

/// Adaptive batch sizing for bulk inserts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchPolicy {
    /// Batch size used after the first transient failure.
    pub initial: usize,
    /// Multiplier applied on every further transient failure.
    pub shrink: f64,
    /// Smallest batch size worth retrying with.
    pub minimum: usize,
}

impl BatchPolicy {
    /// Returns the batch size to retry with after a transient failure at `previous`,
    /// or `None` once it would drop below the minimum.
    pub fn next_size(&self, previous: usize, first_failure: bool) -> Option<usize> {
        let candidate = if first_failure {
            self.initial.min(previous)
        } else {
            (previous as f64 * self.shrink).floor() as usize
        };
        let next = if candidate >= previous {
            previous.checked_sub(1)?
        } else {
            candidate
        };

        (next >= self.minimum.max(1)).then_some(next)
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            initial: INITIAL_BATCH_SIZE,
            shrink: BATCH_SHRINK_FACTOR,
            minimum: MINIMUM_BATCH_SIZE,
        }
    }
}

/// Settings of one ingestion run.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub listing_urls: Vec<String>,
    /// Serve already cached pages from disk.
    pub use_cache: bool,
    /// Write staged records to the store; dry run otherwise.
    pub commit: bool,
    pub fragment_policy: FragmentPolicy,
    /// Cache index flushes after this many commits.
    pub save_frequency: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            listing_urls: Vec::new(),
            use_cache: true,
            commit: false,
            fragment_policy: FragmentPolicy::default(),
            save_frequency: DEFAULT_SAVE_FREQUENCY,
        }
    }
}
