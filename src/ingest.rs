//! The ingest command: listings to issues, issues to pages, pages to staged
//! records.

use std::collections::{HashSet, VecDeque};

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::adapt::adapt_text;
use crate::checkpoint::ProgressCheckpoint;
use crate::classify::WordClassifier;
use crate::config::IngestConfig;
use crate::page_fetcher::PageSource;
use crate::parse::{IssueLink, IssueTitle, parse_listing};
use crate::reassemble::ParagraphReassembler;
use crate::segment::ArticleSegmenter;
use crate::staging::{SaveReport, StagingRepository};
use crate::storage::{ParagraphRow, PublicationRow, RecordStore};
use crate::walk::PaginationWalker;

/// What one run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub listings: usize,
    pub issues: usize,
    pub skipped_issues: usize,
    pub pages: usize,
    pub articles: usize,
    pub paragraphs: usize,
    pub saved: SaveReport,
}

pub struct Ingestor<P, S> {
    config: IngestConfig,
    source: P,
    store: S,
    staging: StagingRepository,
    checkpoint: ProgressCheckpoint,
    classifier: WordClassifier,
    walker: PaginationWalker,
    records: Vec<ParagraphRow>,
    report: IngestReport,
}

impl<P: PageSource, S: RecordStore> Ingestor<P, S> {
    pub fn new(
        config: IngestConfig,
        source: P,
        store: S,
        checkpoint: ProgressCheckpoint,
        classifier: WordClassifier,
    ) -> Self {
        Self {
            config,
            source,
            store,
            staging: StagingRepository::default(),
            checkpoint,
            classifier,
            walker: PaginationWalker::default(),
            records: Vec::new(),
            report: IngestReport::default(),
        }
    }

    pub fn with_walker(mut self, walker: PaginationWalker) -> Self {
        self.walker = walker;
        self
    }

    /// Paragraphs extracted so far, in extraction order.
    pub fn records(&self) -> &[ParagraphRow] {
        &self.records
    }

    pub fn staging(&self) -> &StagingRepository {
        &self.staging
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn checkpoint(&self) -> &ProgressCheckpoint {
        &self.checkpoint
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    /// Processes every configured listing, then flushes the page cache and the
    /// checkpoint whether or not processing succeeded.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: a malformed publication title, a fetch
    /// that exhausted its retries, a staging failure, or a failed flush.
    pub async fn run(&mut self) -> Result<IngestReport> {
        let outcome = self.ingest_listings().await;
        let flushed = self.flush();

        match (outcome, flushed) {
            (Ok(()), Ok(())) => Ok(self.report),
            (Ok(()), Err(flush_error)) => Err(flush_error),
            (Err(run_error), Ok(())) => Err(run_error),
            (Err(run_error), Err(flush_error)) => {
                error!("{flush_error:#}");
                Err(run_error)
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.source.flush()?;
        self.checkpoint
            .flush()
            .context("Unable to flush progress checkpoint")
    }

    async fn ingest_listings(&mut self) -> Result<()> {
        if self.config.commit {
            self.staging
                .load(&self.store)
                .context("Unable to load stored records")?;
        }

        let mut queue: VecDeque<String> = self.config.listing_urls.iter().cloned().collect();
        let mut seen = HashSet::new();

        while let Some(listing_url) = queue.pop_front() {
            if !seen.insert(listing_url.clone()) {
                continue;
            }

            let html = self.source.fetch_or_load(&listing_url).await?;
            let listing = parse_listing(&html, &listing_url);
            queue.extend(
                listing
                    .year_links
                    .into_iter()
                    .filter(|link| !seen.contains(link)),
            );

            if self.checkpoint.is_done(&listing_url) {
                info!("Skipping finished listing {listing_url}");
                continue;
            }

            info!("Collecting {} issues of {listing_url}", listing.issues.len());
            for issue in &listing.issues {
                self.ingest_issue(issue).await?;
            }

            if self.config.commit {
                self.commit_listing(&listing_url, &listing.issues)?;
            }
            self.report.listings += 1;
        }

        Ok(())
    }

    fn commit_listing(&mut self, listing_url: &str, issues: &[IssueLink]) -> Result<()> {
        let saved = self
            .staging
            .save(&mut self.store)
            .with_context(|| format!("Unable to save records of {listing_url}"))?;
        accumulate(&mut self.report.saved, saved);

        for issue in issues {
            self.checkpoint.mark_done(&issue.url);
        }
        self.checkpoint.mark_done(listing_url);
        self.checkpoint
            .flush()
            .context("Unable to flush progress checkpoint")
    }

    async fn ingest_issue(&mut self, issue: &IssueLink) -> Result<()> {
        if self.checkpoint.is_done(&issue.url) {
            info!("Skipping pages of {}", issue.full_title);
            self.report.skipped_issues += 1;
            return Ok(());
        }

        let title = IssueTitle::parse(&issue.full_title, &issue.published_date)?;
        info!("Collecting pages of {}", issue.full_title);

        let walk = self
            .walker
            .walk(&mut self.source, &issue.url)
            .await
            .with_context(|| format!("Unable to walk {}", issue.full_title))?;
        if !walk.complete {
            warn!("Walk of {} ended early after {} pages", issue.full_title, walk.pages.len());
        }

        self.staging.add_newspaper(&title.newspaper);
        let publication = self.staging.add_publication(&title);

        let mut reassembler = ParagraphReassembler::new(self.config.fragment_policy);
        let mut paragraphs = Vec::new();
        for page in &walk.pages {
            paragraphs.extend(reassembler.push_page(page));
            if let Some(text) = page.text.as_deref() {
                let stats = self.classifier.classify(text);
                self.staging.add_page(&publication, page, adapt_text(text), stats);
            }
        }
        reassembler.finish();

        let articles = ArticleSegmenter::new(&self.classifier).segment(&paragraphs);
        let row_publication = PublicationRow {
            newspaper: title.newspaper.clone(),
            published_date: title.published_date,
            volume: title.volume,
            number: title.number,
        };
        for article in &articles {
            let article_key = self.staging.add_article(&publication, article);
            for paragraph in &article.paragraphs {
                self.staging.add_paragraph(&article_key, paragraph);
                self.records.push(ParagraphRow {
                    publication: row_publication.clone(),
                    article_title: article.title.clone(),
                    article_index: article.index,
                    paragraph_index: paragraph.index,
                    page_number: paragraph.page_number,
                    url: paragraph.url.clone(),
                    text: paragraph.text.clone(),
                    stats: paragraph.stats,
                });
                self.report.paragraphs += 1;
            }
        }

        info!(
            "Finished with {}: {} pages, {} articles",
            issue.full_title,
            walk.pages.len(),
            articles.len()
        );
        self.report.issues += 1;
        self.report.pages += walk.pages.len();
        self.report.articles += articles.len();
        Ok(())
    }
}

fn accumulate(total: &mut SaveReport, saved: SaveReport) {
    total.newspapers += saved.newspapers;
    total.publications += saved.publications;
    total.pages += saved.pages;
    total.articles += saved.articles;
    total.paragraphs += saved.paragraphs;
}
