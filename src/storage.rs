//! The storage module persists newspapers, publications, pages, articles and
//! paragraphs in SQLite and reads them back for export.

use std::fmt;
use std::hash::Hash;
use std::iter;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use log::debug;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, Row, params_from_iter};

use crate::classify::WordStats;
use crate::error::WriteError;
use crate::staging::{
    ArticleKey, ArticleRecord, NewspaperKey, NewspaperRecord, PageKey, PageRecord, ParagraphKey,
    ParagraphRecord, PublicationKey, PublicationRecord,
};

/// A record type with its own table.
pub trait Table {
    type Key: Clone + Eq + Hash + fmt::Display + fmt::Debug;

    /// Human readable name used in logs and errors.
    const ENTITY: &'static str;
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Selects the natural key columns followed by the id of every row.
    const KEY_QUERY: &'static str;

    /// Reads a natural key and id from a [`Self::KEY_QUERY`] row.
    ///
    /// # Errors
    ///
    /// Returns an error if a column is missing or has an unexpected type.
    fn read_key(row: &Row<'_>) -> rusqlite::Result<(Self::Key, i64)>;

    /// Column values in [`Self::COLUMNS`] order, or `None` while a parent
    /// reference is unresolved.
    fn values(&self) -> Option<Vec<Value>>;
}

/// Bulk writes and key lookups of staged records.
pub trait RecordStore {
    /// Inserts all `rows` in chunks of `batch_size`, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::Transient`] when the write may succeed with a
    /// smaller batch or on retry, any other variant when it will not.
    fn insert_batch<R: Table>(&mut self, rows: &[&R], batch_size: usize) -> Result<usize, WriteError>;

    /// Returns the natural key and id of every stored row of `R`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    fn load_keys<R: Table>(&self) -> Result<Vec<(R::Key, i64)>, WriteError>;
}

/// Storage provides database operations on the harvested records.
pub struct Storage {
    /// The underlying SQLite connection wrapped in Arc<Mutex<>> to make it thread-safe
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Creates a new Storage instance with a database at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if database creation fails
    pub fn new(database_path: &str) -> Result<Self> {
        let conn = Connection::open(database_path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates a Storage instance backed by a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Initializes the database schema if it doesn't exist.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS newspapers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS publications (
                id INTEGER PRIMARY KEY,
                newspaper_id INTEGER NOT NULL REFERENCES newspapers (id),
                published_date TEXT NOT NULL,
                volume INTEGER NULL,
                number INTEGER NULL
            );
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY,
                publication_id INTEGER NOT NULL REFERENCES publications (id),
                page_number INTEGER NOT NULL,
                url TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                adapted_text TEXT NOT NULL,
                maori_word_count INTEGER NOT NULL,
                ambiguous_word_count INTEGER NOT NULL,
                other_word_count INTEGER NOT NULL,
                total_word_count INTEGER NOT NULL,
                percentage_maori REAL NOT NULL,
                UNIQUE (publication_id, page_number)
            );
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                publication_id INTEGER NOT NULL REFERENCES publications (id),
                article_index INTEGER NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                UNIQUE (publication_id, article_index)
            );
            CREATE TABLE IF NOT EXISTS paragraphs (
                id INTEGER PRIMARY KEY,
                article_id INTEGER NOT NULL REFERENCES articles (id),
                paragraph_index INTEGER NOT NULL,
                page_number INTEGER NOT NULL,
                url TEXT NOT NULL,
                text TEXT NOT NULL,
                maori_word_count INTEGER NOT NULL,
                ambiguous_word_count INTEGER NOT NULL,
                other_word_count INTEGER NOT NULL,
                total_word_count INTEGER NOT NULL,
                percentage_maori REAL NOT NULL,
                UNIQUE (article_id, paragraph_index)
            );",
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, WriteError> {
        self.conn
            .lock()
            .map_err(|_| WriteError::Unavailable("storage mutex poisoned".to_owned()))
    }

    /// Returns every stored paragraph with its article and publication, in
    /// publication, article and paragraph order.
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub fn paragraph_rows(&self) -> Result<Vec<ParagraphRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT n.name, p.published_date, p.volume, p.number, a.title, a.article_index,
                    pr.paragraph_index, pr.page_number, pr.url, pr.text,
                    pr.maori_word_count, pr.ambiguous_word_count, pr.other_word_count,
                    pr.total_word_count, pr.percentage_maori
            FROM paragraphs pr
            JOIN articles a ON a.id = pr.article_id
            JOIN publications p ON p.id = a.publication_id
            JOIN newspapers n ON n.id = p.newspaper_id
            ORDER BY p.id, a.article_index, pr.paragraph_index",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ParagraphRow {
                publication: read_publication(row, 0)?,
                article_title: row.get(4)?,
                article_index: row.get(5)?,
                paragraph_index: row.get(6)?,
                page_number: row.get(7)?,
                url: row.get(8)?,
                text: row.get(9)?,
                stats: read_stats(row, 10)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("Unable to read paragraph rows: {e}"))
    }

    /// Returns every stored page with its publication, in publication and page order.
    ///
    /// # Errors
    ///
    /// Returns an error if database operation fails
    pub fn page_rows(&self) -> Result<Vec<PageRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT n.name, p.published_date, p.volume, p.number,
                    pg.page_number, pg.url, pg.raw_text, pg.adapted_text,
                    pg.maori_word_count, pg.ambiguous_word_count, pg.other_word_count,
                    pg.total_word_count, pg.percentage_maori
            FROM pages pg
            JOIN publications p ON p.id = pg.publication_id
            JOIN newspapers n ON n.id = p.newspaper_id
            ORDER BY p.id, pg.page_number",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PageRow {
                publication: read_publication(row, 0)?,
                page_number: row.get(4)?,
                url: row.get(5)?,
                raw_text: row.get(6)?,
                adapted_text: row.get(7)?,
                stats: read_stats(row, 8)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("Unable to read page rows: {e}"))
    }
}

impl RecordStore for Storage {
    fn insert_batch<R: Table>(&mut self, rows: &[&R], batch_size: usize) -> Result<usize, WriteError> {
        let batch_size = batch_size.max(1);
        let row_placeholders = format!(
            "({})",
            iter::repeat_n("?", R::COLUMNS.len()).collect::<Vec<_>>().join(", ")
        );

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(classify)?;
        let mut written = 0;
        for chunk in rows.chunks(batch_size) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                R::TABLE,
                R::COLUMNS.join(", "),
                iter::repeat_n(row_placeholders.as_str(), chunk.len())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut values = Vec::with_capacity(chunk.len() * R::COLUMNS.len());
            for row in chunk {
                values.extend(row.values().ok_or(WriteError::Unresolved { table: R::TABLE })?);
            }
            written += tx.execute(&sql, params_from_iter(values)).map_err(classify)?;
        }
        tx.commit().map_err(classify)?;

        debug!("Inserted {written} {} rows in batches of {batch_size}", R::ENTITY);
        Ok(written)
    }

    fn load_keys<R: Table>(&self) -> Result<Vec<(R::Key, i64)>, WriteError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(R::KEY_QUERY)?;
        let keys = stmt.query_map([], R::read_key)?;

        Ok(keys.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Sorts SQLite failures into ones a smaller batch or a retry may get past and
/// everything else.
fn classify(error: rusqlite::Error) -> WriteError {
    let transient = match &error {
        rusqlite::Error::SqliteFailure(failure, message) => {
            matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::TooBig
                    | ErrorCode::OutOfMemory
                    | ErrorCode::DiskFull
            ) || message
                .as_deref()
                .is_some_and(|message| message.contains("too many SQL variables"))
        }
        _ => false,
    };

    if transient {
        WriteError::Transient(error.to_string())
    } else {
        WriteError::Fatal(error)
    }
}

/// Newspaper, date, volume and number of an exported row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationRow {
    pub newspaper: String,
    pub published_date: NaiveDate,
    pub volume: Option<u32>,
    pub number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphRow {
    pub publication: PublicationRow,
    pub article_title: String,
    pub article_index: u32,
    pub paragraph_index: u32,
    pub page_number: u32,
    pub url: String,
    pub text: String,
    pub stats: WordStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRow {
    pub publication: PublicationRow,
    pub page_number: u32,
    pub url: String,
    pub raw_text: String,
    pub adapted_text: String,
    pub stats: WordStats,
}

fn read_publication(row: &Row<'_>, offset: usize) -> rusqlite::Result<PublicationRow> {
    Ok(PublicationRow {
        newspaper: row.get(offset)?,
        published_date: row.get(offset + 1)?,
        volume: row.get(offset + 2)?,
        number: row.get(offset + 3)?,
    })
}

fn read_publication_key(row: &Row<'_>, offset: usize) -> rusqlite::Result<PublicationKey> {
    let publication = read_publication(row, offset)?;
    Ok(PublicationKey {
        newspaper: NewspaperKey(publication.newspaper),
        published_date: publication.published_date,
        volume: publication.volume,
        number: publication.number,
    })
}

fn read_stats(row: &Row<'_>, offset: usize) -> rusqlite::Result<WordStats> {
    let count = |index: usize| -> rusqlite::Result<usize> {
        let value: i64 = row.get(index)?;
        Ok(usize::try_from(value).unwrap_or_default())
    };

    Ok(WordStats {
        maori: count(offset)?,
        ambiguous: count(offset + 1)?,
        other: count(offset + 2)?,
        total: count(offset + 3)?,
        percentage: row.get(offset + 4)?,
    })
}

fn integer(value: impl TryInto<i64>) -> Value {
    Value::Integer(value.try_into().unwrap_or(i64::MAX))
}

fn optional_integer(value: Option<u32>) -> Value {
    value.map_or(Value::Null, |value| Value::Integer(i64::from(value)))
}

fn stats_values(stats: &WordStats) -> [Value; 5] {
    [
        integer(stats.maori),
        integer(stats.ambiguous),
        integer(stats.other),
        integer(stats.total),
        Value::Real(stats.percentage),
    ]
}

impl Table for NewspaperRecord {
    type Key = NewspaperKey;

    const ENTITY: &'static str = "newspaper";
    const TABLE: &'static str = "newspapers";
    const COLUMNS: &'static [&'static str] = &["name"];
    const KEY_QUERY: &'static str = "SELECT name, id FROM newspapers";

    fn read_key(row: &Row<'_>) -> rusqlite::Result<(NewspaperKey, i64)> {
        Ok((NewspaperKey(row.get(0)?), row.get(1)?))
    }

    fn values(&self) -> Option<Vec<Value>> {
        Some(vec![Value::Text(self.name.clone())])
    }
}

impl Table for PublicationRecord {
    type Key = PublicationKey;

    const ENTITY: &'static str = "publication";
    const TABLE: &'static str = "publications";
    const COLUMNS: &'static [&'static str] = &["newspaper_id", "published_date", "volume", "number"];
    const KEY_QUERY: &'static str = concat!(
        "SELECT n.name, p.published_date, p.volume, p.number, p.id ",
        "FROM publications p JOIN newspapers n ON n.id = p.newspaper_id"
    );

    fn read_key(row: &Row<'_>) -> rusqlite::Result<(PublicationKey, i64)> {
        Ok((read_publication_key(row, 0)?, row.get(4)?))
    }

    fn values(&self) -> Option<Vec<Value>> {
        Some(vec![
            Value::Integer(self.newspaper.id()?),
            Value::Text(self.published_date.format("%Y-%m-%d").to_string()),
            optional_integer(self.volume),
            optional_integer(self.number),
        ])
    }
}

impl Table for PageRecord {
    type Key = PageKey;

    const ENTITY: &'static str = "page";
    const TABLE: &'static str = "pages";
    const COLUMNS: &'static [&'static str] = &[
        "publication_id",
        "page_number",
        "url",
        "raw_text",
        "adapted_text",
        "maori_word_count",
        "ambiguous_word_count",
        "other_word_count",
        "total_word_count",
        "percentage_maori",
    ];
    const KEY_QUERY: &'static str = concat!(
        "SELECT n.name, p.published_date, p.volume, p.number, pg.page_number, pg.id ",
        "FROM pages pg JOIN publications p ON p.id = pg.publication_id ",
        "JOIN newspapers n ON n.id = p.newspaper_id"
    );

    fn read_key(row: &Row<'_>) -> rusqlite::Result<(PageKey, i64)> {
        let key = PageKey {
            publication: read_publication_key(row, 0)?,
            page_number: row.get(4)?,
        };
        Ok((key, row.get(5)?))
    }

    fn values(&self) -> Option<Vec<Value>> {
        let mut values = vec![
            Value::Integer(self.publication.id()?),
            Value::Integer(i64::from(self.page_number)),
            Value::Text(self.url.clone()),
            Value::Text(self.raw_text.clone()),
            Value::Text(self.adapted_text.clone()),
        ];
        values.extend(stats_values(&self.stats));
        Some(values)
    }
}

impl Table for ArticleRecord {
    type Key = ArticleKey;

    const ENTITY: &'static str = "article";
    const TABLE: &'static str = "articles";
    const COLUMNS: &'static [&'static str] = &["publication_id", "article_index", "title", "url"];
    const KEY_QUERY: &'static str = concat!(
        "SELECT n.name, p.published_date, p.volume, p.number, a.article_index, a.id ",
        "FROM articles a JOIN publications p ON p.id = a.publication_id ",
        "JOIN newspapers n ON n.id = p.newspaper_id"
    );

    fn read_key(row: &Row<'_>) -> rusqlite::Result<(ArticleKey, i64)> {
        let key = ArticleKey {
            publication: read_publication_key(row, 0)?,
            index: row.get(4)?,
        };
        Ok((key, row.get(5)?))
    }

    fn values(&self) -> Option<Vec<Value>> {
        Some(vec![
            Value::Integer(self.publication.id()?),
            Value::Integer(i64::from(self.index)),
            Value::Text(self.title.clone()),
            Value::Text(self.url.clone()),
        ])
    }
}

impl Table for ParagraphRecord {
    type Key = ParagraphKey;

    const ENTITY: &'static str = "paragraph";
    const TABLE: &'static str = "paragraphs";
    const COLUMNS: &'static [&'static str] = &[
        "article_id",
        "paragraph_index",
        "page_number",
        "url",
        "text",
        "maori_word_count",
        "ambiguous_word_count",
        "other_word_count",
        "total_word_count",
        "percentage_maori",
    ];
    const KEY_QUERY: &'static str = concat!(
        "SELECT n.name, p.published_date, p.volume, p.number, a.article_index, pr.paragraph_index, pr.id ",
        "FROM paragraphs pr JOIN articles a ON a.id = pr.article_id ",
        "JOIN publications p ON p.id = a.publication_id ",
        "JOIN newspapers n ON n.id = p.newspaper_id"
    );

    fn read_key(row: &Row<'_>) -> rusqlite::Result<(ParagraphKey, i64)> {
        let key = ParagraphKey {
            article: ArticleKey {
                publication: read_publication_key(row, 0)?,
                index: row.get(4)?,
            },
            index: row.get(5)?,
        };
        Ok((key, row.get(6)?))
    }

    fn values(&self) -> Option<Vec<Value>> {
        let mut values = vec![
            Value::Integer(self.article.id()?),
            Value::Integer(i64::from(self.index)),
            Value::Integer(i64::from(self.page_number)),
            Value::Text(self.url.clone()),
            Value::Text(self.text.clone()),
        ];
        values.extend(stats_values(&self.stats));
        Some(values)
    }
}
