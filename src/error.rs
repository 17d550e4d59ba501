//! Failure taxonomy shared by the ingestion components.
//!
//! Transient failures are retried inside the component that can retry them and
//! only escape wrapped in a fatal variant once a retry cap is exceeded.

use thiserror::Error;

/// Errors raised by the persistent fetch cache and its body store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key {url} already exists")]
    DuplicateKey { url: String },
    #[error("cache id {got} for {url} is not the next id {expected}")]
    IdMismatch { url: String, expected: u64, got: u64 },
    #[error("unsupported cache file version {0}")]
    UnsupportedVersion(u32),
    #[error("stored body {0} is missing")]
    MissingBody(u64),
    #[error("cache i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache file is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

/// A browser session failure. Always retriable.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}")]
    Status {
        url: String,
        status: u16,
        /// HTML served with the error status, e.g. a captcha interstitial.
        page: Option<String>,
    },
    #[error("no page loaded in session")]
    NoPage,
    #[error("captcha form not found: {0}")]
    Form(String),
}

impl SessionError {
    /// The page that came with an error status, if the server sent one.
    pub fn page(&self) -> Option<&str> {
        match self {
            SessionError::Status { page, .. } => page.as_deref(),
            _ => None,
        }
    }
}

/// Captcha solving failures. They only ever trigger a session reload.
#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha is unsolvable")]
    Unsolvable,
    #[error("captcha was not solved within {0:?}")]
    Timeout(std::time::Duration),
    #[error("captcha service error: {0}")]
    Service(String),
}

/// The terminal fetch failure, raised once the retry cap is exceeded.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("giving up on {url} after {attempts} attempts: {cause}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        cause: String,
    },
}

/// Write failures reported by a record store.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("transient write failure: {0}")]
    Transient(String),
    #[error(transparent)]
    Fatal(#[from] rusqlite::Error),
    #[error("store is unavailable: {0}")]
    Unavailable(String),
    #[error("row for {table} still has an unresolved parent reference")]
    Unresolved { table: &'static str },
}

/// Errors raised while resolving and flushing staged records.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("{entity} references missing parent {parent}")]
    MissingParent { entity: &'static str, parent: String },
    #[error("{entity} {key} still has an unresolved parent reference")]
    Unresolved { entity: &'static str, key: String },
    #[error("batch size for {entity} fell below {minimum} after transient failures: {last}")]
    BatchUnderflow {
        entity: &'static str,
        minimum: usize,
        last: String,
    },
    #[error("{entity} {key} was written but no id came back from the store")]
    Integrity { entity: &'static str, key: String },
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Publication title or date that does not match the archive's patterns.
#[derive(Debug, Error)]
pub enum TitleError {
    #[error("malformed publication title {0}")]
    MalformedTitle(String),
    #[error("{0} does not match any date format")]
    MalformedDate(String),
}
