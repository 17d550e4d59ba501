use std::fs;

use niupepa::cache::{BodyStore, PersistentFetchCache};
use niupepa::checkpoint::ProgressCheckpoint;
use niupepa::config::CacheConfig;
use niupepa::error::CacheError;
use spectral::prelude::*;
use tempfile::TempDir;

const FIRST: &str = "http://archive.test/first";
const SECOND: &str = "http://archive.test/second";

fn open_cache(dir: &TempDir, save_frequency: u64) -> PersistentFetchCache {
    PersistentFetchCache::open(&CacheConfig::new(dir.path(), "test"), save_frequency)
        .expect("Expected the cache index to open.")
}

#[test]
fn ids_are_dense_from_one() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let mut cache = open_cache(&dir, 10);

    assert_that(&cache.get_or_assign(FIRST)).is_equal_to((1, true));
    cache.commit(FIRST, 1).expect("Expected the first commit to succeed.");
    assert_that(&cache.get_or_assign(SECOND)).is_equal_to((2, true));
    cache.commit(SECOND, 2).expect("Expected the second commit to succeed.");

    assert_that(&cache.get_or_assign(FIRST)).is_equal_to((1, false));
    assert_that(&cache.len()).is_equal_to(2);
}

#[test]
fn ids_survive_a_restart() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    {
        let mut cache = open_cache(&dir, 10);
        cache.commit(FIRST, 1).expect("Expected the first commit to succeed.");
        cache.commit(SECOND, 2).expect("Expected the second commit to succeed.");
        cache.flush().expect("Expected the index to flush.");
    }

    let cache = open_cache(&dir, 10);
    assert_that(&cache.get_or_assign(SECOND)).is_equal_to((2, false));
    assert_that(&cache.get_or_assign("http://archive.test/third")).is_equal_to((3, true));
}

#[test]
fn unflushed_commits_are_lost_on_restart() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    {
        let mut cache = open_cache(&dir, 10);
        cache.commit(FIRST, 1).expect("Expected the commit to succeed.");
    }

    assert_that(&open_cache(&dir, 10).is_empty()).is_true();
}

#[test]
fn index_flushes_every_save_frequency_commits() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let config = CacheConfig::new(dir.path(), "test");
    let mut cache = open_cache(&dir, 2);

    cache.commit(FIRST, 1).expect("Expected the commit to succeed.");
    assert_that(&config.index_path().exists()).is_false();

    cache.commit(SECOND, 2).expect("Expected the commit to succeed.");
    assert_that(&config.index_path().exists()).is_true();
}

#[test]
fn duplicate_commit_is_rejected() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let mut cache = open_cache(&dir, 10);
    cache.commit(FIRST, 1).expect("Expected the commit to succeed.");

    let result = cache.commit(FIRST, 2);

    assert_that(&matches!(result, Err(CacheError::DuplicateKey { .. }))).is_true();
}

#[test]
fn commit_with_a_skipped_id_is_rejected() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let mut cache = open_cache(&dir, 10);

    let result = cache.commit(FIRST, 5);

    assert_that(&matches!(
        result,
        Err(CacheError::IdMismatch {
            expected: 1,
            got: 5,
            ..
        })
    ))
    .is_true();
}

#[test]
fn unknown_index_version_is_rejected() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let config = CacheConfig::new(dir.path(), "test");
    fs::create_dir_all(config.namespace_dir()).expect("Expected the namespace dir.");
    fs::write(config.index_path(), r#"{"version": 99, "entries": {}}"#)
        .expect("Expected the index to be written.");

    let result = PersistentFetchCache::open(&config, 10);

    assert_that(&matches!(result, Err(CacheError::UnsupportedVersion(99)))).is_true();
}

#[test]
fn body_store_keeps_body_and_source_url() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let bodies = BodyStore::open_at(dir.path()).expect("Expected the body store to open.");

    bodies
        .store(7, FIRST, "<html>Kia ora</html>")
        .expect("Expected the body to be stored.");

    assert_that(&bodies.exists(7)).is_true();
    assert_that(&bodies.load(7).expect("Expected the body to load."))
        .is_equal_to("<html>Kia ora</html>".to_owned());
    assert_that(&bodies.source_url(7).expect("Expected the header to load."))
        .is_equal_to(Some(FIRST.to_owned()));
}

#[test]
fn missing_body_is_reported() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let bodies = BodyStore::open_at(dir.path()).expect("Expected the body store to open.");

    assert_that(&matches!(bodies.load(3), Err(CacheError::MissingBody(3)))).is_true();
}

#[test]
fn checkpoint_survives_a_restart() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let path = dir.path().join("progress.json");
    {
        let mut checkpoint = ProgressCheckpoint::open_at(&path).expect("Expected the checkpoint to open.");
        checkpoint.mark_done(FIRST);
        checkpoint.flush().expect("Expected the checkpoint to flush.");
    }

    let checkpoint = ProgressCheckpoint::open_at(&path).expect("Expected the checkpoint to reopen.");
    assert_that(&checkpoint.is_done(FIRST)).is_true();
    assert_that(&checkpoint.is_done(SECOND)).is_false();
}

#[test]
fn unchanged_checkpoint_is_not_written() {
    let dir = TempDir::new().expect("Expected a temp dir.");
    let path = dir.path().join("progress.json");
    let mut checkpoint = ProgressCheckpoint::open_at(&path).expect("Expected the checkpoint to open.");

    checkpoint.flush().expect("Expected the flush to succeed.");

    assert_that(&path.exists()).is_false();
}
