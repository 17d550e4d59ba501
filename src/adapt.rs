//! Prepares page text for language model training.
//!
//! Amounts, dates, times and numbers are replaced by `<number>`, `<date>` and
//! `<time>` tags, then the text is lower-cased, punctuation is split into its
//! own tokens and the sentence is wrapped in `<s> … </s>`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::reassemble::collapse_whitespace;

const MONTHS: &str = "(?:hanuere|pepuere|maehe|apereira|mei|hune|hurae|akuhata|hepetema|oketopa|noema|nowema|tihema|january|february|march|april|may|june|july|august|september|october|november|december)";

const NUMBER_TAG: &str = " <number> ";
const DATE_TAG: &str = " <date> ";
const TIME_TAG: &str = " <time> ";

static MONEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)£ ?[1-9]\d{0,2}(?:[,.'’] ?\d{3})*(?:(?: ?\d+ ?[lsd]\.?){1,3}|(?:[.,]{1,2}\d{1,2}){1,2})?|£ ?\d+")
        .expect("Failed to compile MONEY regex")
});
static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,2}/\d{1,2}(?:/\d{2,4})?\b").expect("Failed to compile NUMERIC_DATE regex")
});
static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(?:te )?\d{{1,2}},?(?: o)? {MONTHS},? \d{{4}}\b"))
        .expect("Failed to compile DAY_MONTH_YEAR regex")
});
static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{MONTHS},? \d{{1,2}},? \d{{4}}\b"))
        .expect("Failed to compile MONTH_DAY_YEAR regex")
});
static YEAR_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b\d{{4}},? {MONTHS}\b")).expect("Failed to compile YEAR_MONTH regex")
});
static MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{MONTHS},? \d{{4}}\b")).expect("Failed to compile MONTH_YEAR regex")
});
static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(?:te )?\d{{1,2}},?(?: o)? {MONTHS}\b"))
        .expect("Failed to compile DAY_MONTH regex")
});
static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{MONTHS},? \d{{1,2}}\b"))
        .expect("Failed to compile MONTH_DAY regex")
});
static TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d{1,2}(?:[.:,] ?\d{1,2}){0,2} ?[ap]\.?m\b\.?|\b\d{1,2}\. ?\d{1,2}\b")
        .expect("Failed to compile TIME regex")
});
static GROUPED_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[1-9]\d{0,2}(?:,\d{3})+\b").expect("Failed to compile GROUPED_NUMBER regex")
});
static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d+").expect("Failed to compile NUMBER regex")
});

static APOSTROPHE_WH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"w['’‘`"]"#).expect("Failed to compile APOSTROPHE_WH regex")
});
static DASHES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[–—‒]").expect("Failed to compile DASHES regex")
});
static SYMBOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([^\p{L}\s])").expect("Failed to compile SYMBOL regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"< (date|number|time) >").expect("Failed to compile TAG regex")
});

/// Returns the language model form of `raw`, e.g.
/// `"Te 12 o Hune, 1877."` becomes `"<s> <date> . </s>"`.
pub fn adapt_text(raw: &str) -> String {
    tokenize_for_model(&replace_quantities(raw))
}

/// Replaces amounts, dates, times and numbers with tags and drops characters
/// that are neither letters, punctuation nor whitespace.
pub fn replace_quantities(text: &str) -> String {
    let replacements: [(&Lazy<Regex>, &str); 11] = [
        (&MONEY, NUMBER_TAG),
        (&NUMERIC_DATE, DATE_TAG),
        (&DAY_MONTH_YEAR, DATE_TAG),
        (&MONTH_DAY_YEAR, DATE_TAG),
        (&YEAR_MONTH, DATE_TAG),
        (&MONTH_YEAR, DATE_TAG),
        (&DAY_MONTH, DATE_TAG),
        (&MONTH_DAY, DATE_TAG),
        (&TIME, TIME_TAG),
        (&GROUPED_NUMBER, NUMBER_TAG),
        (&NUMBER, NUMBER_TAG),
    ];

    let mut text = text.to_owned();
    for (pattern, tag) in replacements {
        text = pattern.replace_all(&text, tag).into_owned();
    }

    let kept: String = text
        .chars()
        .filter(|c| {
            c.is_alphabetic()
                || c.is_whitespace()
                || c.is_ascii_punctuation()
                || "‘’“”–—£".contains(*c)
        })
        .collect();
    collapse_whitespace(&kept)
}

fn tokenize_for_model(text: &str) -> String {
    let text = text.to_lowercase();
    let text = APOSTROPHE_WH.replace_all(&text, "wh");
    let text = DASHES.replace_all(&text, "-");
    let text = SYMBOL.replace_all(&text, " $1 ");
    let text = TAG.replace_all(&text, "<$1>");
    let text = text.replace('-', "@-@");

    format!("<s> {} </s>", collapse_whitespace(&text))
}
