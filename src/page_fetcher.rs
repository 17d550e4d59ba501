//! Fetch-or-load access to archive pages on top of the persistent cache.

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::cache::{BodyStore, PersistentFetchCache};
use crate::fetch::RemoteFetch;

/// A source of page bodies addressed by URL.
#[allow(async_fn_in_trait)]
pub trait PageSource {
    /// # Errors
    ///
    /// Returns an error if the page is neither stored nor fetchable.
    async fn fetch_or_load(&mut self, url: &str) -> Result<String>;

    /// Persists whatever bookkeeping is safe to persist right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the bookkeeping cannot be written.
    fn flush(&mut self) -> Result<()>;
}

/// Serves committed pages from disk and fetches everything else.
///
/// A body is always written before its id is committed, so the index never
/// points at a missing body.
pub struct PageFetcher<F> {
    cache: PersistentFetchCache,
    bodies: BodyStore,
    remote: F,
    use_cache: bool,
    network_fetches: usize,
}

impl<F: RemoteFetch> PageFetcher<F> {
    pub fn new(cache: PersistentFetchCache, bodies: BodyStore, remote: F, use_cache: bool) -> Self {
        Self {
            cache,
            bodies,
            remote,
            use_cache,
            network_fetches: 0,
        }
    }

    pub fn cache(&self) -> &PersistentFetchCache {
        &self.cache
    }

    pub fn remote(&self) -> &F {
        &self.remote
    }

    /// Number of bodies that had to come from the network.
    pub fn network_fetches(&self) -> usize {
        self.network_fetches
    }

    async fn download(&mut self, url: &str, id: u64) -> Result<String> {
        let body = self.remote.fetch(url).await?;
        self.network_fetches += 1;
        self.bodies
            .store(id, url, &body)
            .with_context(|| format!("Unable to store body {id} of {url}"))?;
        Ok(body)
    }

    /// A body stored under a fresh id by an interrupted run, before its commit.
    fn prepopulated(&self, url: &str, id: u64) -> Option<String> {
        if !self.bodies.exists(id) {
            return None;
        }
        match self.bodies.source_url(id) {
            Ok(Some(source)) if source == url => self.bodies.load(id).ok(),
            Ok(_) => None,
            Err(error) => {
                warn!("Ignoring unreadable body {id}: {error}");
                None
            }
        }
    }
}

impl<F: RemoteFetch> PageSource for PageFetcher<F> {
    async fn fetch_or_load(&mut self, url: &str) -> Result<String> {
        let (id, is_new) = self.cache.get_or_assign(url);

        if !is_new {
            if self.use_cache && self.bodies.exists(id) {
                debug!("Loading {url} from cache entry {id}");
                return self
                    .bodies
                    .load(id)
                    .with_context(|| format!("Unable to load cached body {id} of {url}"));
            }
            info!("Refetching {url} into cache entry {id}");
            return self.download(url, id).await;
        }

        let body = match self.prepopulated(url, id) {
            Some(body) if self.use_cache => {
                debug!("Reusing stored body {id} of {url}");
                body
            }
            _ => self.download(url, id).await?,
        };
        self.cache.commit(url, id)?;

        Ok(body)
    }

    fn flush(&mut self) -> Result<()> {
        self.cache.flush().context("Unable to flush cache index")
    }
}
