use niupepa::walk::PaginationWalker;
use spectral::prelude::*;

use crate::fakes::{MapPageSource, archive_page};

mod fakes;

const BASE: &str = "http://archive.test/";

fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

#[tokio::test]
async fn walk_follows_next_links_to_the_last_page() {
    let mut source = MapPageSource::new(vec![
        (url("p1"), archive_page(1, &["Tuatahi."], Some("p2"))),
        (url("p2"), archive_page(2, &["Tuarua."], Some("p3"))),
        (url("p3"), archive_page(3, &["Tuatoru."], None)),
    ]);

    let walk = PaginationWalker::default()
        .walk(&mut source, &url("p1"))
        .await
        .expect("Expected the walk to succeed.");

    assert_that(&walk.complete).is_true();
    let numbers: Vec<u32> = walk.pages.iter().map(|page| page.number).collect();
    assert_that(&numbers).is_equal_to(vec![1, 2, 3]);
    let has_next: Vec<bool> = walk.pages.iter().map(|page| page.has_next).collect();
    assert_that(&has_next).is_equal_to(vec![true, true, false]);
    assert_that(&source.fetched).is_equal_to(vec![url("p1"), url("p2"), url("p3")]);
}

#[tokio::test]
async fn page_text_keeps_one_line_per_block() {
    let mut source = MapPageSource::new(vec![(
        url("p1"),
        archive_page(1, &["Tuatahi.", "Tuarua."], None),
    )]);

    let walk = PaginationWalker::default()
        .walk(&mut source, &url("p1"))
        .await
        .expect("Expected the walk to succeed.");

    let page = walk.pages.first().expect("Expected one page.");
    assert_that(&page.url).is_equal_to(url("p1"));
    assert_that(&page.text).is_equal_to(Some("Tuatahi.\nTuarua.\n".to_owned()));
}

#[tokio::test]
async fn link_back_into_the_publication_ends_the_walk() {
    let mut source = MapPageSource::new(vec![
        (url("p1"), archive_page(1, &["Tuatahi."], Some("p2"))),
        (url("p2"), archive_page(2, &["Tuarua."], Some("p1"))),
    ]);

    let walk = PaginationWalker::default()
        .walk(&mut source, &url("p1"))
        .await
        .expect("Expected the walk to succeed.");

    assert_that(&walk.complete).is_false();
    assert_that(&walk.pages).has_length(2);
}

#[tokio::test]
async fn unrecognised_layout_keeps_collected_pages() {
    let mut source = MapPageSource::new(vec![
        (url("p1"), archive_page(1, &["Tuatahi."], Some("p2"))),
        (url("p2"), "<html><body><p>Not found</p></body></html>".to_owned()),
    ]);

    let walk = PaginationWalker::default()
        .walk(&mut source, &url("p1"))
        .await
        .expect("Expected the walk to succeed.");

    assert_that(&walk.complete).is_false();
    assert_that(&walk.pages).has_length(1);
}

#[tokio::test]
async fn page_cap_ends_the_walk() {
    let mut source = MapPageSource::new(vec![
        (url("p1"), archive_page(1, &["Tuatahi."], Some("p2"))),
        (url("p2"), archive_page(2, &["Tuarua."], Some("p3"))),
        (url("p3"), archive_page(3, &["Tuatoru."], None)),
    ]);

    let walk = PaginationWalker::new(2)
        .walk(&mut source, &url("p1"))
        .await
        .expect("Expected the walk to succeed.");

    assert_that(&walk.complete).is_false();
    assert_that(&walk.pages).has_length(2);
}

#[tokio::test]
async fn page_without_text_is_kept() {
    let mut source = MapPageSource::new(vec![
        (url("p1"), archive_page(1, &[], Some("p2"))),
        (url("p2"), archive_page(2, &["Tuarua."], None)),
    ]);

    let walk = PaginationWalker::default()
        .walk(&mut source, &url("p1"))
        .await
        .expect("Expected the walk to succeed.");

    assert_that(&walk.complete).is_true();
    let texts: Vec<Option<String>> = walk.pages.iter().map(|page| page.text.clone()).collect();
    assert_that(&texts).is_equal_to(vec![None, Some("Tuarua.\n".to_owned())]);
}

#[tokio::test]
async fn fetch_failure_abandons_the_walk() {
    let mut source = MapPageSource::new(vec![(url("p1"), archive_page(1, &["Tuatahi."], Some("p2")))]);

    let result = PaginationWalker::default().walk(&mut source, &url("p1")).await;

    assert_that(&result.is_err()).is_true();
}
