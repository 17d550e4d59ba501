//! The export module writes stored paragraphs or pages as a flat JSON array
//! for corpus consumers.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::ExportLevel;
use crate::constants::EXPORT_SOURCE;
use crate::storage::{PageRow, ParagraphRow, PublicationRow, Storage};

/// A date in MongoDB extended JSON, `{"$date": "1877-06-12T00:00:00Z"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtendedDate {
    #[serde(rename = "$date")]
    pub date: String,
}

impl From<&PublicationRow> for ExtendedDate {
    fn from(publication: &PublicationRow) -> Self {
        Self {
            date: publication
                .published_date
                .format("%Y-%m-%dT00:00:00Z")
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParagraphExport {
    #[serde(rename = "Source")]
    pub source: &'static str,
    #[serde(rename = "Newspaper")]
    pub newspaper: String,
    #[serde(rename = "Date_Publication")]
    pub published: ExtendedDate,
    #[serde(rename = "Volume")]
    pub volume: Option<u32>,
    #[serde(rename = "Number")]
    pub number: Option<u32>,
    #[serde(rename = "Article_Title")]
    pub article_title: String,
    #[serde(rename = "Article_Number")]
    pub article_number: u32,
    #[serde(rename = "Paragraph_Number")]
    pub paragraph_number: u32,
    #[serde(rename = "Text_Raw")]
    pub text: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Percent_Maori")]
    pub percent_maori: f64,
    #[serde(rename = "Num_Words_Maori")]
    pub maori: usize,
    #[serde(rename = "Num_Words_Ambi")]
    pub ambiguous: usize,
    #[serde(rename = "Num_Words_Other")]
    pub other: usize,
    #[serde(rename = "Num_Words_Total")]
    pub total: usize,
}

impl From<&ParagraphRow> for ParagraphExport {
    fn from(row: &ParagraphRow) -> Self {
        Self {
            source: EXPORT_SOURCE,
            newspaper: row.publication.newspaper.clone(),
            published: ExtendedDate::from(&row.publication),
            volume: row.publication.volume,
            number: row.publication.number,
            article_title: row.article_title.clone(),
            article_number: row.article_index,
            paragraph_number: row.paragraph_index,
            text: row.text.clone(),
            url: row.url.clone(),
            percent_maori: row.stats.percentage,
            maori: row.stats.maori,
            ambiguous: row.stats.ambiguous,
            other: row.stats.other,
            total: row.stats.total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageExport {
    #[serde(rename = "Source")]
    pub source: &'static str,
    #[serde(rename = "Newspaper")]
    pub newspaper: String,
    #[serde(rename = "Date_Publication")]
    pub published: ExtendedDate,
    #[serde(rename = "Volume")]
    pub volume: Option<u32>,
    #[serde(rename = "Number")]
    pub number: Option<u32>,
    #[serde(rename = "Page_Number")]
    pub page_number: u32,
    #[serde(rename = "Text_Raw")]
    pub raw_text: String,
    #[serde(rename = "Text_Adapted")]
    pub adapted_text: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Percent_Maori")]
    pub percent_maori: f64,
    #[serde(rename = "Num_Words_Maori")]
    pub maori: usize,
    #[serde(rename = "Num_Words_Ambi")]
    pub ambiguous: usize,
    #[serde(rename = "Num_Words_Other")]
    pub other: usize,
    #[serde(rename = "Num_Words_Total")]
    pub total: usize,
}

impl From<&PageRow> for PageExport {
    fn from(row: &PageRow) -> Self {
        Self {
            source: EXPORT_SOURCE,
            newspaper: row.publication.newspaper.clone(),
            published: ExtendedDate::from(&row.publication),
            volume: row.publication.volume,
            number: row.publication.number,
            page_number: row.page_number,
            raw_text: row.raw_text.clone(),
            adapted_text: row.adapted_text.clone(),
            url: row.url.clone(),
            percent_maori: row.stats.percentage,
            maori: row.stats.maori,
            ambiguous: row.stats.ambiguous,
            other: row.stats.other,
            total: row.stats.total,
        }
    }
}

/// Writes `rows` to `output_path` as one JSON array, replacing the file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_json<T: Serialize>(output_path: &str, rows: &[T]) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(output_path)
        .with_context(|| format!("Unable to open {output_path}"))?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, rows)
        .with_context(|| format!("Unable to write JSON to {output_path}"))?;
    writer.flush()?;

    Ok(())
}

/// Exports every stored paragraph or page of the database at `db_path` to
/// `output_path` and returns the number of exported records.
///
/// # Errors
///
/// Returns an error if:
/// * Database operations fail
/// * File operations fail
pub fn export(db_path: &str, output_path: &str, level: ExportLevel) -> Result<usize> {
    let storage = Storage::new(db_path)?;

    info!("Exporting {level} records from database {db_path} to {output_path}...");

    let count = match level {
        ExportLevel::Paragraph => {
            let rows: Vec<ParagraphExport> = storage
                .paragraph_rows()?
                .iter()
                .map(ParagraphExport::from)
                .collect();
            write_json(output_path, &rows)?;
            rows.len()
        }
        ExportLevel::Page => {
            let rows: Vec<PageExport> = storage.page_rows()?.iter().map(PageExport::from).collect();
            write_json(output_path, &rows)?;
            rows.len()
        }
    };

    info!("Exported {count} {level} records to {output_path}");
    Ok(count)
}
