//! Scores text for Māori content, word by word.
//!
//! Words are lower-cased and the digraphs `wh` (also written `w'`) and `ng` are
//! folded into single symbols, which turns the Māori spelling rules into
//! per-character checks: no two consonants in a row, no trailing consonant and
//! nothing outside the Māori alphabet.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

const VOWELS: &str = "aāeēiīoōuū";
const CONSONANTS: &str = "hkmnprtwŋƒ";
const NG: char = 'ŋ';
const WH: char = 'ƒ';

const BUILTIN_STOP_WORDS: &str = include_str!("../assets/stop_words.txt");
const BUILTIN_AMBIGUOUS_WORDS: &str = include_str!("../assets/ambiguous_words.txt");

/// The two word lists the classifier consults before applying spelling rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    stop_words: HashSet<String>,
    ambiguous_words: HashSet<String>,
}

impl Vocabulary {
    pub fn new<S, A>(stop_words: S, ambiguous_words: A) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        Self {
            stop_words: stop_words.into_iter().map(|w| list_key(w.as_ref())).collect(),
            ambiguous_words: ambiguous_words
                .into_iter()
                .map(|w| list_key(w.as_ref()))
                .collect(),
        }
    }

    /// The word lists shipped with the crate.
    pub fn builtin() -> Self {
        Self::new(
            list_entries(BUILTIN_STOP_WORDS),
            list_entries(BUILTIN_AMBIGUOUS_WORDS),
        )
    }

    /// Reads one word per line; blank lines and `#` comments are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read.
    pub fn from_files(stop_words: &Path, ambiguous_words: &Path) -> Result<Self> {
        let stop = fs::read_to_string(stop_words)
            .with_context(|| format!("Failed to read stop words {}", stop_words.display()))?;
        let ambiguous = fs::read_to_string(ambiguous_words).with_context(|| {
            format!("Failed to read ambiguous words {}", ambiguous_words.display())
        })?;
        Ok(Self::new(list_entries(&stop), list_entries(&ambiguous)))
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(&list_key(word))
    }

    pub fn is_ambiguous(&self, word: &str) -> bool {
        self.ambiguous_words.contains(&list_key(word))
    }
}

/// The bucket a single word falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordClass {
    Maori,
    Ambiguous,
    Other,
}

/// Word counts of a text span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WordStats {
    pub maori: usize,
    pub ambiguous: usize,
    pub other: usize,
    pub total: usize,
    /// Share of Māori words among Māori and other words, ambiguous ones left
    /// out, rounded to two decimals.
    pub percentage: f64,
}

impl WordStats {
    pub fn from_counts(maori: usize, ambiguous: usize, other: usize) -> Self {
        let decided = maori + other;
        let percentage = if decided == 0 {
            0.0
        } else {
            (maori as f64 * 100.0 / decided as f64 * 100.0).round() / 100.0
        };

        Self {
            maori,
            ambiguous,
            other,
            total: decided + ambiguous,
            percentage,
        }
    }
}

/// Word frequencies of a text span, per bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WordTally {
    pub maori: BTreeMap<String, usize>,
    pub ambiguous: BTreeMap<String, usize>,
    pub other: BTreeMap<String, usize>,
}

impl WordTally {
    pub fn stats(&self) -> WordStats {
        let count = |bucket: &BTreeMap<String, usize>| bucket.values().sum();
        WordStats::from_counts(count(&self.maori), count(&self.ambiguous), count(&self.other))
    }
}

#[derive(Debug, Clone)]
pub struct WordClassifier {
    vocabulary: Vocabulary,
}

impl WordClassifier {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Counts Māori, ambiguous and other words of `text`.
    pub fn classify(&self, text: &str) -> WordStats {
        let (mut maori, mut ambiguous, mut other) = (0, 0, 0);
        for token in tokenize(text) {
            match self.classify_word(&token) {
                WordClass::Maori => maori += 1,
                WordClass::Ambiguous => ambiguous += 1,
                WordClass::Other => other += 1,
            }
        }
        WordStats::from_counts(maori, ambiguous, other)
    }

    /// Like [`Self::classify`], keeping the words of each bucket.
    pub fn tally(&self, text: &str) -> WordTally {
        let mut tally = WordTally::default();
        for token in tokenize(text) {
            let bucket = match self.classify_word(&token) {
                WordClass::Maori => &mut tally.maori,
                WordClass::Ambiguous => &mut tally.ambiguous,
                WordClass::Other => &mut tally.other,
            };
            *bucket.entry(unfold(&fold(&token))).or_default() += 1;
        }
        tally
    }

    /// Classifies one already tokenised word.
    pub fn classify_word(&self, word: &str) -> WordClass {
        let folded = fold(&word.to_lowercase());
        let key = strip_macrons(&folded);

        if self.vocabulary.ambiguous_words.contains(&key) {
            return WordClass::Ambiguous;
        }

        let chars: Vec<char> = folded.chars().collect();
        let consecutive_consonants = chars
            .windows(2)
            .any(|pair| pair.iter().all(|c| is_consonant(*c)));
        let ends_in_consonant = chars.last().is_some_and(|c| is_consonant(*c));
        let foreign_letter = chars.iter().any(|c| !is_maori_letter(*c));

        if consecutive_consonants
            || ends_in_consonant
            || foreign_letter
            || self.vocabulary.stop_words.contains(&key)
        {
            WordClass::Other
        } else {
            WordClass::Maori
        }
    }
}

impl Default for WordClassifier {
    fn default() -> Self {
        Self::new(Vocabulary::builtin())
    }
}

/// Splits `text` into lower-cased words made of Latin letters, macronised
/// vowels, apostrophes and hyphens.
///
/// Hyphens never start or end a word and a double hyphen separates words.
/// Apostrophes are dropped from the edges, where they are quotation marks.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if is_token_char(c) {
            run.extend(c.to_lowercase());
            continue;
        }
        if run.is_empty() {
            continue;
        }
        for piece in run.split("--") {
            let word = piece.trim_matches(|c: char| c == '-' || c == '\'' || c == '’');
            if !word.is_empty() {
                tokens.push(word.to_owned());
            }
        }
        run.clear();
    }
    tokens
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphabetic() || "āēīōūĀĒĪŌŪ'’-".contains(c)
}

fn is_consonant(c: char) -> bool {
    CONSONANTS.contains(c)
}

fn is_maori_letter(c: char) -> bool {
    VOWELS.contains(c) || CONSONANTS.contains(c) || c == '-'
}

/// Replaces `wh`, `w'`, `w’` and `ng` of a lower-cased word with single symbols.
pub fn fold(word: &str) -> String {
    let mut folded = String::with_capacity(word.len());
    let mut chars = word.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('w', Some('h' | '\'' | '’')) => {
                chars.next();
                folded.push(WH);
            }
            ('n', Some('g')) => {
                chars.next();
                folded.push(NG);
            }
            _ => folded.push(c),
        }
    }
    folded
}

/// Reverses [`fold`], spelling digraphs as `wh` and `ng`.
pub fn unfold(word: &str) -> String {
    word.replace(WH, "wh").replace(NG, "ng")
}

fn strip_macrons(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            'ā' => 'a',
            'ē' => 'e',
            'ī' => 'i',
            'ō' => 'o',
            'ū' => 'u',
            other => other,
        })
        .collect()
}

fn list_key(word: &str) -> String {
    strip_macrons(&fold(&word.trim().to_lowercase()))
}

fn list_entries(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
