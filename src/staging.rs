//! In-memory staging of newly discovered records.
//!
//! Records are keyed by their natural keys and reference their parents either
//! by a persisted id or, until the parent is written, by the parent's natural
//! key. [`StagingRepository::save`] writes the collections parent-first and
//! resolves every pending reference just before its collection is written.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use log::{debug, info, warn};

use crate::classify::WordStats;
use crate::config::BatchPolicy;
use crate::error::{StagingError, WriteError};
use crate::parse::IssueTitle;
use crate::segment::{Article, Paragraph};
use crate::storage::{RecordStore, Table};
use crate::walk::RawPage;

/// A foreign key that is either known or still waiting for its parent's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ref<K> {
    Resolved(i64),
    Pending(K),
}

impl<K> Ref<K> {
    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Resolved(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewspaperKey(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicationKey {
    pub newspaper: NewspaperKey,
    pub published_date: NaiveDate,
    pub volume: Option<u32>,
    pub number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub publication: PublicationKey,
    pub page_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArticleKey {
    pub publication: PublicationKey,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParagraphKey {
    pub article: ArticleKey,
    pub index: u32,
}

impl fmt::Display for NewspaperKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PublicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.newspaper, self.published_date)?;
        if let Some(volume) = self.volume {
            write!(f, " Volume {volume}")?;
        }
        if let Some(number) = self.number {
            write!(f, " No. {number}")?;
        }
        Ok(())
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} page {}", self.publication, self.page_number)
    }
}

impl fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} article {}", self.publication, self.index)
    }
}

impl fmt::Display for ParagraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} paragraph {}", self.article, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewspaperRecord {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRecord {
    pub newspaper: Ref<NewspaperKey>,
    pub published_date: NaiveDate,
    pub volume: Option<u32>,
    pub number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub publication: Ref<PublicationKey>,
    pub page_number: u32,
    pub url: String,
    pub raw_text: String,
    pub adapted_text: String,
    pub stats: WordStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleRecord {
    pub publication: Ref<PublicationKey>,
    pub index: u32,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphRecord {
    pub article: Ref<ArticleKey>,
    pub index: u32,
    pub page_number: u32,
    pub url: String,
    pub text: String,
    pub stats: WordStats,
}

/// A record whose parent must be written first.
pub trait Child: Table {
    type Parent: Table;

    fn parent_mut(&mut self) -> &mut Ref<<Self::Parent as Table>::Key>;
}

impl Child for PublicationRecord {
    type Parent = NewspaperRecord;

    fn parent_mut(&mut self) -> &mut Ref<NewspaperKey> {
        &mut self.newspaper
    }
}

impl Child for PageRecord {
    type Parent = PublicationRecord;

    fn parent_mut(&mut self) -> &mut Ref<PublicationKey> {
        &mut self.publication
    }
}

impl Child for ArticleRecord {
    type Parent = PublicationRecord;

    fn parent_mut(&mut self) -> &mut Ref<PublicationKey> {
        &mut self.publication
    }
}

impl Child for ParagraphRecord {
    type Parent = ArticleRecord;

    fn parent_mut(&mut self) -> &mut Ref<ArticleKey> {
        &mut self.article
    }
}

/// Persisted ids and staged records of one entity, by natural key.
#[derive(Debug)]
pub struct Collection<R: Table> {
    ids: HashMap<R::Key, i64>,
    staged: Vec<(R::Key, R)>,
    staged_index: HashMap<R::Key, usize>,
}

impl<R: Table> Default for Collection<R> {
    fn default() -> Self {
        Self {
            ids: HashMap::new(),
            staged: Vec::new(),
            staged_index: HashMap::new(),
        }
    }
}

impl<R: Table> Collection<R> {
    pub fn contains(&self, key: &R::Key) -> bool {
        self.ids.contains_key(key) || self.staged_index.contains_key(key)
    }

    /// The persisted id of `key`, if it has one.
    pub fn id(&self, key: &R::Key) -> Option<i64> {
        self.ids.get(key).copied()
    }

    /// The staged record of `key`, if it is not persisted yet.
    pub fn staged(&self, key: &R::Key) -> Option<&R> {
        self.staged_index
            .get(key)
            .and_then(|position| self.staged.get(*position))
            .map(|(_, record)| record)
    }

    pub fn reference(&self, key: &R::Key) -> Ref<R::Key> {
        match self.id(key) {
            Some(id) => Ref::Resolved(id),
            None => Ref::Pending(key.clone()),
        }
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    pub fn persisted_len(&self) -> usize {
        self.ids.len()
    }

    /// Stages `record` unless `key` is already known. Returns whether it was staged.
    fn add(&mut self, key: R::Key, record: R) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.staged_index.insert(key.clone(), self.staged.len());
        self.staged.push((key, record));
        true
    }

    fn seed(&mut self, ids: Vec<(R::Key, i64)>) {
        for (key, id) in ids {
            if let Some(position) = self.staged_index.remove(&key) {
                warn!("{} {key} is already stored, unstaging it", R::ENTITY);
                self.staged.remove(position);
                self.reindex();
            }
            self.ids.insert(key, id);
        }
    }

    fn reindex(&mut self) {
        self.staged_index = self
            .staged
            .iter()
            .enumerate()
            .map(|(position, (key, _))| (key.clone(), position))
            .collect();
    }
}

/// Number of rows written per collection by one save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub newspapers: usize,
    pub publications: usize,
    pub pages: usize,
    pub articles: usize,
    pub paragraphs: usize,
}

impl SaveReport {
    pub fn total(&self) -> usize {
        self.newspapers + self.publications + self.pages + self.articles + self.paragraphs
    }
}

impl fmt::Display for SaveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} newspapers, {} publications, {} pages, {} articles, {} paragraphs",
            self.newspapers, self.publications, self.pages, self.articles, self.paragraphs
        )
    }
}

#[derive(Debug, Default)]
pub struct StagingRepository {
    policy: BatchPolicy,
    newspapers: Collection<NewspaperRecord>,
    publications: Collection<PublicationRecord>,
    pages: Collection<PageRecord>,
    articles: Collection<ArticleRecord>,
    paragraphs: Collection<ParagraphRecord>,
}

impl StagingRepository {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Seeds every collection with the natural keys and ids already in `store`,
    /// so records written by earlier runs are never staged again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load<S: RecordStore>(&mut self, store: &S) -> Result<(), StagingError> {
        self.newspapers.seed(store.load_keys::<NewspaperRecord>()?);
        self.publications.seed(store.load_keys::<PublicationRecord>()?);
        self.pages.seed(store.load_keys::<PageRecord>()?);
        self.articles.seed(store.load_keys::<ArticleRecord>()?);
        self.paragraphs.seed(store.load_keys::<ParagraphRecord>()?);
        debug!(
            "Loaded {} stored newspapers and {} stored publications",
            self.newspapers.persisted_len(),
            self.publications.persisted_len()
        );
        Ok(())
    }

    pub fn add_newspaper(&mut self, name: &str) -> NewspaperKey {
        let key = NewspaperKey(name.to_owned());
        self.newspapers.add(
            key.clone(),
            NewspaperRecord {
                name: name.to_owned(),
            },
        );
        key
    }

    /// Stages the publication described by `title`. Its newspaper has to be
    /// added separately.
    pub fn add_publication(&mut self, title: &IssueTitle) -> PublicationKey {
        let newspaper = NewspaperKey(title.newspaper.clone());
        let key = PublicationKey {
            newspaper: newspaper.clone(),
            published_date: title.published_date,
            volume: title.volume,
            number: title.number,
        };
        if !self.publications.contains(&key) {
            let record = PublicationRecord {
                newspaper: self.newspapers.reference(&newspaper),
                published_date: title.published_date,
                volume: title.volume,
                number: title.number,
            };
            self.publications.add(key.clone(), record);
        }
        key
    }

    pub fn add_page(
        &mut self,
        publication: &PublicationKey,
        page: &RawPage,
        adapted_text: String,
        stats: WordStats,
    ) -> PageKey {
        let key = PageKey {
            publication: publication.clone(),
            page_number: page.number,
        };
        if !self.pages.contains(&key) {
            let record = PageRecord {
                publication: self.publications.reference(publication),
                page_number: page.number,
                url: page.url.clone(),
                raw_text: page.text.clone().unwrap_or_default(),
                adapted_text,
                stats,
            };
            self.pages.add(key.clone(), record);
        }
        key
    }

    pub fn add_article(&mut self, publication: &PublicationKey, article: &Article) -> ArticleKey {
        let key = ArticleKey {
            publication: publication.clone(),
            index: article.index,
        };
        if !self.articles.contains(&key) {
            let record = ArticleRecord {
                publication: self.publications.reference(publication),
                index: article.index,
                title: article.title.clone(),
                url: article.url.clone(),
            };
            self.articles.add(key.clone(), record);
        }
        key
    }

    pub fn add_paragraph(&mut self, article: &ArticleKey, paragraph: &Paragraph) -> ParagraphKey {
        let key = ParagraphKey {
            article: article.clone(),
            index: paragraph.index,
        };
        if !self.paragraphs.contains(&key) {
            let record = ParagraphRecord {
                article: self.articles.reference(article),
                index: paragraph.index,
                page_number: paragraph.page_number,
                url: paragraph.url.clone(),
                text: paragraph.text.clone(),
                stats: paragraph.stats,
            };
            self.paragraphs.add(key.clone(), record);
        }
        key
    }

    pub fn newspaper_ref(&self, key: &NewspaperKey) -> Ref<NewspaperKey> {
        self.newspapers.reference(key)
    }

    pub fn publication_ref(&self, key: &PublicationKey) -> Ref<PublicationKey> {
        self.publications.reference(key)
    }

    pub fn article_ref(&self, key: &ArticleKey) -> Ref<ArticleKey> {
        self.articles.reference(key)
    }

    pub fn newspapers(&self) -> &Collection<NewspaperRecord> {
        &self.newspapers
    }

    pub fn publications(&self) -> &Collection<PublicationRecord> {
        &self.publications
    }

    pub fn pages(&self) -> &Collection<PageRecord> {
        &self.pages
    }

    pub fn articles(&self) -> &Collection<ArticleRecord> {
        &self.articles
    }

    pub fn paragraphs(&self) -> &Collection<ParagraphRecord> {
        &self.paragraphs
    }

    /// Number of records waiting to be written.
    pub fn staged_len(&self) -> usize {
        self.newspapers.staged_len()
            + self.publications.staged_len()
            + self.pages.staged_len()
            + self.articles.staged_len()
            + self.paragraphs.staged_len()
    }

    /// Writes every staged record, parents first.
    ///
    /// Each collection is written in one store transaction. Its parent
    /// references are resolved before anything of it is written, so a missing
    /// parent leaves that collection and the ones after it staged.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::MissingParent`] for a reference to a parent that
    /// was never added, [`StagingError::BatchUnderflow`] once transient write
    /// failures shrank the batch below the minimum, and any fatal store error.
    pub fn save<S: RecordStore>(&mut self, store: &mut S) -> Result<SaveReport, StagingError> {
        let mut report = SaveReport {
            newspapers: flush(&mut self.newspapers, store, &self.policy)?,
            ..SaveReport::default()
        };

        resolve(&mut self.publications, &self.newspapers)?;
        report.publications = flush(&mut self.publications, store, &self.policy)?;

        resolve(&mut self.pages, &self.publications)?;
        report.pages = flush(&mut self.pages, store, &self.policy)?;

        resolve(&mut self.articles, &self.publications)?;
        report.articles = flush(&mut self.articles, store, &self.policy)?;

        resolve(&mut self.paragraphs, &self.articles)?;
        report.paragraphs = flush(&mut self.paragraphs, store, &self.policy)?;

        if report.total() > 0 {
            info!("Saved {report}");
        }
        Ok(report)
    }
}

fn resolve<R: Child>(children: &mut Collection<R>, parents: &Collection<R::Parent>) -> Result<(), StagingError> {
    for (_, record) in &mut children.staged {
        let parent = record.parent_mut();
        let Ref::Pending(key) = &*parent else {
            continue;
        };
        let id = parents.id(key).ok_or_else(|| StagingError::MissingParent {
            entity: R::ENTITY,
            parent: format!("{} {key}", <R::Parent as Table>::ENTITY),
        })?;
        *parent = Ref::Resolved(id);
    }
    Ok(())
}

fn flush<R: Table, S: RecordStore>(
    collection: &mut Collection<R>,
    store: &mut S,
    policy: &BatchPolicy,
) -> Result<usize, StagingError> {
    if collection.staged.is_empty() {
        return Ok(0);
    }
    if let Some((key, _)) = collection.staged.iter().find(|(_, record)| record.values().is_none()) {
        return Err(StagingError::Unresolved {
            entity: R::ENTITY,
            key: key.to_string(),
        });
    }

    let rows: Vec<&R> = collection.staged.iter().map(|(_, record)| record).collect();
    let written = insert_adaptive(store, &rows, policy)?;

    let ids: HashMap<R::Key, i64> = store.load_keys::<R>()?.into_iter().collect();
    if let Some((key, _)) = collection.staged.iter().find(|(key, _)| !ids.contains_key(key)) {
        return Err(StagingError::Integrity {
            entity: R::ENTITY,
            key: key.to_string(),
        });
    }

    collection.staged.clear();
    collection.staged_index.clear();
    collection.ids = ids;
    Ok(written)
}

/// Inserts `rows`, shrinking the batch size after every transient failure.
///
/// The first attempt sends the whole collection; the first failure drops to the
/// policy's initial size, later failures shrink by its factor.
fn insert_adaptive<R: Table, S: RecordStore>(
    store: &mut S,
    rows: &[&R],
    policy: &BatchPolicy,
) -> Result<usize, StagingError> {
    let mut batch_size = rows.len().max(1);
    let mut first_failure = true;

    loop {
        match store.insert_batch(rows, batch_size) {
            Ok(written) => return Ok(written),
            Err(WriteError::Transient(reason)) => {
                let Some(next) = policy.next_size(batch_size, first_failure) else {
                    return Err(StagingError::BatchUnderflow {
                        entity: R::ENTITY,
                        minimum: policy.minimum,
                        last: reason,
                    });
                };
                warn!(
                    "Writing {} {} rows in batches of {batch_size} failed ({reason}), retrying with {next}",
                    rows.len(),
                    R::ENTITY
                );
                batch_size = next;
                first_failure = false;
            }
            Err(error) => return Err(error.into()),
        }
    }
}
