//! Turns the text of consecutive pages into paragraphs, joining paragraphs
//! that run over a page break.
//!
//! A page's text is cut into units after every `.`, `!` or `?` that ends a
//! line, optionally followed by closing quotes or brackets. When the last unit
//! of a page is not terminated and the publication continues, it is held back
//! as a [`PendingFragment`] and completed by the next page.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::FragmentPolicy;
use crate::walk::RawPage;

static UNITS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s).*?[.!?][”’"'\)» ]*\n|.+$"#).expect("Failed to compile UNITS regex")
});

const TERMINALS: &[char] = &['.', '!', '?'];
const CLOSERS: &[char] = &['”', '’', '"', '\'', ')', '»', ' '];

/// A paragraph with the page it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedParagraph {
    pub page_number: u32,
    pub url: String,
    pub text: String,
}

/// Unfinished paragraph text carried from the end of one page to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFragment {
    pub page_number: u32,
    pub url: String,
    pub text: String,
}

/// Reassembles the paragraphs of one publication, page by page.
///
/// Feed pages in link order through [`Self::push_page`], then call
/// [`Self::finish`]. One reassembler must not be shared between publications.
#[derive(Debug, Default)]
pub struct ParagraphReassembler {
    policy: FragmentPolicy,
    pending: Option<PendingFragment>,
}

impl ParagraphReassembler {
    pub fn new(policy: FragmentPolicy) -> Self {
        Self {
            policy,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&PendingFragment> {
        self.pending.as_ref()
    }

    /// Returns the paragraphs completed by `page`.
    ///
    /// A completed fragment is attributed to the page it started on. Whether a
    /// heading drops a pending fragment or lets it wait for the next body
    /// paragraph depends on the [`FragmentPolicy`].
    pub fn push_page(&mut self, page: &RawPage) -> Vec<SourcedParagraph> {
        let Some(text) = page.text.as_deref() else {
            return Vec::new();
        };

        let units: Vec<&str> = split_units(text)
            .into_iter()
            .map(str::trim)
            .filter(|unit| !unit.is_empty())
            .collect();
        let last = units.len().saturating_sub(1);

        let mut paragraphs = Vec::with_capacity(units.len());
        for (position, unit) in units.into_iter().enumerate() {
            let heading = is_heading(unit);

            if position == last && page.has_next && !heading && !ends_sentence(unit) {
                self.carry(page, unit);
                continue;
            }

            if heading {
                if self.policy == FragmentPolicy::DiscardOnHeading
                    && let Some(fragment) = self.pending.take()
                {
                    warn!(
                        "Discarding unfinished paragraph from page {} of {}: next page opens with a heading",
                        fragment.page_number, fragment.url
                    );
                }
                paragraphs.push(SourcedParagraph {
                    page_number: page.number,
                    url: page.url.clone(),
                    text: collapse_whitespace(unit),
                });
                continue;
            }

            let paragraph = match self.pending.take() {
                Some(fragment) => {
                    debug!("Completing paragraph from page {}", fragment.page_number);
                    SourcedParagraph {
                        page_number: fragment.page_number,
                        url: fragment.url,
                        text: collapse_whitespace(&format!("{} {unit}", fragment.text)),
                    }
                }
                None => SourcedParagraph {
                    page_number: page.number,
                    url: page.url.clone(),
                    text: collapse_whitespace(unit),
                },
            };
            if !paragraph.text.is_empty() {
                paragraphs.push(paragraph);
            }
        }

        paragraphs
    }

    /// Ends the publication, dropping a fragment that never completed.
    pub fn finish(&mut self) -> Option<PendingFragment> {
        let fragment = self.pending.take();
        if let Some(fragment) = &fragment {
            warn!(
                "Dropping unfinished paragraph from page {} of {}",
                fragment.page_number, fragment.url
            );
        }
        fragment
    }

    fn carry(&mut self, page: &RawPage, unit: &str) {
        match self.pending.as_mut() {
            Some(fragment) => {
                fragment.text.push(' ');
                fragment.text.push_str(unit);
            }
            None => {
                self.pending = Some(PendingFragment {
                    page_number: page.number,
                    url: page.url.clone(),
                    text: unit.to_owned(),
                });
            }
        }
    }
}

/// Cuts page text into paragraph units, keeping their line breaks.
pub fn split_units(text: &str) -> Vec<&str> {
    UNITS.find_iter(text).map(|unit| unit.as_str()).collect()
}

/// True for text with at least one cased letter and no lower-case letters.
pub fn is_heading(text: &str) -> bool {
    text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
}

/// True when `text` ends in terminal punctuation, ignoring closing quotes and brackets.
pub fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .trim_end_matches(CLOSERS)
        .ends_with(TERMINALS)
}

/// Collapses every run of whitespace to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
