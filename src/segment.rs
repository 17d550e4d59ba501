//! Groups the paragraphs of a publication into articles.

use log::warn;

use crate::classify::{WordClassifier, WordStats};
use crate::reassemble::{SourcedParagraph, is_heading};

/// A body paragraph with its word counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Paragraph {
    /// 1-based position within the article.
    pub index: u32,
    pub page_number: u32,
    pub url: String,
    pub text: String,
    pub stats: WordStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    /// 1-based position within the publication.
    pub index: u32,
    /// The heading text; empty for content that precedes every heading.
    pub title: String,
    pub url: String,
    pub paragraphs: Vec<Paragraph>,
}

/// Splits a paragraph stream at all-caps headings.
pub struct ArticleSegmenter<'a> {
    classifier: &'a WordClassifier,
}

impl<'a> ArticleSegmenter<'a> {
    pub fn new(classifier: &'a WordClassifier) -> Self {
        Self { classifier }
    }

    /// Returns the articles of `paragraphs` in order.
    ///
    /// A heading opens an article and every following non-heading paragraph
    /// belongs to it. Content before the first heading forms an untitled
    /// article. Articles left without content are dropped.
    pub fn segment(&self, paragraphs: &[SourcedParagraph]) -> Vec<Article> {
        let mut articles = Vec::new();
        let mut current: Option<Article> = None;

        for paragraph in paragraphs {
            if is_heading(&paragraph.text) {
                if let Some(article) = current.take() {
                    emit(&mut articles, article);
                }
                current = Some(Article {
                    index: 0,
                    title: paragraph.text.clone(),
                    url: paragraph.url.clone(),
                    paragraphs: Vec::new(),
                });
                continue;
            }

            let article = current.get_or_insert_with(|| Article {
                index: 0,
                title: String::new(),
                url: paragraph.url.clone(),
                paragraphs: Vec::new(),
            });
            article.paragraphs.push(Paragraph {
                index: article.paragraphs.len() as u32 + 1,
                page_number: paragraph.page_number,
                url: paragraph.url.clone(),
                text: paragraph.text.clone(),
                stats: self.classifier.classify(&paragraph.text),
            });
        }

        if let Some(article) = current {
            emit(&mut articles, article);
        }
        articles
    }
}

fn emit(articles: &mut Vec<Article>, mut article: Article) {
    if article.paragraphs.is_empty() {
        warn!("Skipping article {:?} at {}: no content", article.title, article.url);
        return;
    }
    article.index = articles.len() as u32 + 1;
    articles.push(article);
}
