//! The niupepa library harvests Māori-language text from the paginated,
//! captcha-protected newspaper archive of the New Zealand Digital Library.
//!
//! Pages are fetched once into a persistent cache, split into articles and
//! paragraphs, scored for Māori content and staged for bulk writes to SQLite.

pub mod adapt;
pub mod cache;
pub mod captcha;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod constants;
pub mod error;
pub mod export;
pub mod fetch;
pub mod ingest;
pub mod notify;
pub mod page_fetcher;
pub mod parse;
pub mod reassemble;
pub mod segment;
pub mod session;
pub mod staging;
pub mod storage;
pub mod walk;

use std::fmt;

/// What happens to an unfinished paragraph when the next page opens with a heading.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum FragmentPolicy {
    /// Drop the fragment; it never completes
    #[default]
    DiscardOnHeading,
    /// Keep the fragment and attach it to the first paragraph after the heading
    AttachAfterHeading,
}

impl std::str::FromStr for FragmentPolicy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "discard" => Ok(FragmentPolicy::DiscardOnHeading),
            "attach" => Ok(FragmentPolicy::AttachAfterHeading),
            _ => Err(format!("Invalid fragment policy: {}", input)),
        }
    }
}

/// Enum representing the granularity of exported records.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ExportLevel {
    /// One record per paragraph
    #[default]
    Paragraph,
    /// One record per page
    Page,
}

impl std::str::FromStr for ExportLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "paragraph" => Ok(ExportLevel::Paragraph),
            "page" => Ok(ExportLevel::Page),
            _ => Err(format!("Invalid export level: {}", input)),
        }
    }
}

impl fmt::Display for ExportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportLevel::Paragraph => f.write_str("paragraph"),
            ExportLevel::Page => f.write_str("page"),
        }
    }
}

pub use classify::{Vocabulary, WordClassifier, WordStats};
pub use export::export;
pub use ingest::Ingestor;
pub use staging::{Ref, StagingRepository};
