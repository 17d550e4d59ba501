//! Follows the "next page" links of one publication, collecting page text.

use std::collections::HashSet;

use anyhow::Result;
use log::{info, warn};

use crate::constants::MAX_PAGES_PER_WALK;
use crate::page_fetcher::PageSource;
use crate::parse::extract_page;

/// One fetched page of a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub number: u32,
    pub url: String,
    pub text: Option<String>,
    pub has_next: bool,
}

/// The pages collected by a walk and whether it reached the terminal page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Walk {
    pub pages: Vec<RawPage>,
    pub complete: bool,
}

pub struct PaginationWalker {
    max_pages: usize,
}

impl PaginationWalker {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }

    /// Walks the page chain starting at `start_url` in link order.
    ///
    /// An unrecognised page layout, a link back to a visited page or the page
    /// cap end the walk early with the pages collected so far.
    ///
    /// # Errors
    ///
    /// Returns an error if a page cannot be fetched; the walk is abandoned.
    pub async fn walk<P: PageSource>(&self, source: &mut P, start_url: &str) -> Result<Walk> {
        let mut walk = Walk::default();
        let mut visited = HashSet::new();
        let mut next = Some(start_url.to_owned());

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                warn!("Page {url} links back into its own publication, stopping");
                return Ok(walk);
            }
            if walk.pages.len() >= self.max_pages {
                warn!("Stopping walk at {url} after {} pages", self.max_pages);
                return Ok(walk);
            }

            let body = source.fetch_or_load(&url).await?;
            let page = match extract_page(&body, &url) {
                Ok(page) => page,
                Err(error) => {
                    warn!("{error}, keeping {} collected pages", walk.pages.len());
                    return Ok(walk);
                }
            };

            let number = page
                .page_number
                .unwrap_or(walk.pages.len() as u32 + 1);
            if page.text.is_none() {
                warn!("Failed to extract text from page {number} of {url}");
            } else {
                info!("Extracted page {number}");
            }

            walk.pages.push(RawPage {
                number,
                url,
                text: page.text,
                has_next: page.next_url.is_some(),
            });
            next = page.next_url;
        }

        walk.complete = true;
        Ok(walk)
    }
}

impl Default for PaginationWalker {
    fn default() -> Self {
        Self::new(MAX_PAGES_PER_WALK)
    }
}
