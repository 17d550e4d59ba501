//! Extraction of text, links and publication details from archive HTML.

use chrono::NaiveDate;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use crate::error::TitleError;

static DOCUMENT_TEXT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.documenttext td").expect("Failed to compile DOCUMENT_TEXT selector")
});
static NAV_ARROWS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.navarrowsbottom").expect("Failed to compile NAV_ARROWS selector")
});
static NEXT_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("td[align=right] a[href]").expect("Failed to compile NEXT_LINK selector")
});
static CAPTION: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("b").expect("Failed to compile CAPTION selector")
});
static LISTING_ROWS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".date_list tr").expect("Failed to compile LISTING_ROWS selector")
});
static CELLS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("td").expect("Failed to compile CELLS selector")
});
static LINKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a[href]").expect("Failed to compile LINKS selector")
});
static YEAR_LINKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".h_item a[href]").expect("Failed to compile YEAR_LINKS selector")
});

static PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)page\s+(\d+)").expect("Failed to compile PAGE_NUMBER regex")
});
static NEWSPAPER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*?) \d{4}").expect("Failed to compile NEWSPAPER_NAME regex")
});
static NEWSPAPER_VOLUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*? \d{4}.*?Volume (\d+)").expect("Failed to compile NEWSPAPER_VOLUME regex")
});
static NEWSPAPER_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^.*? \d{4}.*?No\.? ?(\d+)").expect("Failed to compile NEWSPAPER_NUMBER regex")
});

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "br", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6", "center",
];

/// The page could not be recognised as an archive page.
#[derive(Debug, Error)]
#[error("unrecognised page layout at {url}: {reason}")]
pub struct DomShapeError {
    pub url: String,
    pub reason: &'static str,
}

/// What one archive page contributes to a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePage {
    /// Page number from the page caption, if it has one.
    pub page_number: Option<u32>,
    /// Document text with one line per block element.
    pub text: Option<String>,
    pub next_url: Option<String>,
}

/// Extracts the document text, page number and next page link of `html`.
///
/// # Errors
///
/// Returns [`DomShapeError`] if the page has neither a document text region
/// nor a navigation bar.
pub fn extract_page(html: &str, page_url: &str) -> Result<ArchivePage, DomShapeError> {
    let document = Html::parse_document(html);

    let text_region = document.select(&DOCUMENT_TEXT).next();
    let nav = document.select(&NAV_ARROWS).next();
    if text_region.is_none() && nav.is_none() {
        return Err(DomShapeError {
            url: page_url.to_owned(),
            reason: "no document text and no navigation bar",
        });
    }

    let text = text_region
        .map(block_text)
        .filter(|text| !text.trim().is_empty());

    let next_url = nav
        .and_then(|nav| nav.select(&NEXT_LINK).next())
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| absolutize(page_url, href));

    let page_number = document
        .select(&CAPTION)
        .filter_map(|caption| {
            let caption = caption.text().collect::<String>();
            PAGE_NUMBER
                .captures(&caption)
                .and_then(|captures| captures.get(1))
                .and_then(|number| number.as_str().parse().ok())
        })
        .next();

    debug!("Extracted page {page_number:?} of {page_url}, next: {next_url:?}");

    Ok(ArchivePage {
        page_number,
        text,
        next_url,
    })
}

/// Collects the text below `element`, ending every block element with a newline.
pub fn block_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(child_element) => {
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_text(child_ref, out);
                }
                if BLOCK_ELEMENTS.contains(&child_element.name()) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// One issue row of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueLink {
    pub url: String,
    pub full_title: String,
    pub published_date: String,
}

/// The issues and further listing pages linked from a listing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub issues: Vec<IssueLink>,
    pub year_links: Vec<String>,
}

/// Parses a listing page of the archive.
///
/// Rows without a link, title and date are ignored, as are commentary issues.
/// When a row links both an English and a Māori version, the Māori one wins.
pub fn parse_listing(html: &str, page_url: &str) -> Listing {
    let document = Html::parse_document(html);

    let issues = document
        .select(&LISTING_ROWS)
        .filter_map(|row| {
            let cells: Vec<ElementRef<'_>> = row.select(&CELLS).collect();
            let links: Vec<&str> = cells
                .get(2)?
                .select(&LINKS)
                .filter_map(|link| link.value().attr("href"))
                .collect();
            let href = links.get(1).or_else(|| links.first())?;
            let full_title = cells.get(3)?.text().collect::<String>().trim().to_owned();
            let published_date = cells.get(4)?.text().collect::<String>().trim().to_owned();
            if full_title.is_empty() || full_title.to_lowercase().contains("commentary") {
                return None;
            }

            Some(IssueLink {
                url: absolutize(page_url, href)?,
                full_title,
                published_date,
            })
        })
        .collect();

    let year_links = document
        .select(&YEAR_LINKS)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| absolutize(page_url, href))
        .collect();

    Listing { issues, year_links }
}

/// Newspaper, volume, number and date of one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueTitle {
    pub newspaper: String,
    pub volume: Option<u32>,
    pub number: Option<u32>,
    pub published_date: NaiveDate,
}

impl IssueTitle {
    /// Parses titles like `Te Waka Maori 1877 Volume 13 No. 5`.
    ///
    /// # Errors
    ///
    /// Returns [`TitleError`] if the title carries no newspaper name followed by
    /// a year, or the date matches none of the archive's formats.
    pub fn parse(full_title: &str, published_date: &str) -> Result<Self, TitleError> {
        let newspaper = NEWSPAPER_NAME
            .captures(full_title)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().trim().to_owned())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| TitleError::MalformedTitle(full_title.to_owned()))?;

        let capture_number = |pattern: &Regex| {
            pattern
                .captures(full_title)
                .and_then(|captures| captures.get(1))
                .and_then(|number| number.as_str().parse().ok())
        };

        Ok(Self {
            newspaper,
            volume: capture_number(&NEWSPAPER_VOLUME),
            number: capture_number(&NEWSPAPER_NUMBER),
            published_date: parse_published_date(published_date)?,
        })
    }
}

/// Parses `YYYYMMDD`, `YYYYMM`, `YYYY` or `YYYYMM-…` dates, defaulting the
/// missing day and month to the first.
///
/// # Errors
///
/// Returns [`TitleError::MalformedDate`] for anything else.
pub fn parse_published_date(raw: &str) -> Result<NaiveDate, TitleError> {
    let raw = raw.trim();
    let malformed = || TitleError::MalformedDate(raw.to_owned());

    let full = match raw.len() {
        8 => raw.to_owned(),
        6 => format!("{raw}01"),
        4 => format!("{raw}0101"),
        _ => match raw.split_once('-') {
            Some((month, _)) if month.len() == 6 => format!("{month}01"),
            _ => return Err(malformed()),
        },
    };

    NaiveDate::parse_from_str(&full, "%Y%m%d").map_err(|_| malformed())
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .ok()
}
