use std::time::Duration;

use niupepa::captcha::TwoCaptchaSolver;
use niupepa::error::CaptchaError;
use niupepa::fetch::{CaptchaChallenge, CaptchaSolver};
use spectral::prelude::*;

use crate::fakes::{StubResponse, StubServer};

mod fakes;

const ACCEPTED: &str = r#"{"status":1,"request":"42"}"#;
const NOT_READY: &str = r#"{"status":0,"request":"CAPCHA_NOT_READY"}"#;
const SOLVED: &str = r#"{"status":1,"request":"token-abc"}"#;

fn challenge() -> CaptchaChallenge {
    CaptchaChallenge {
        page_url: "http://archive.test/page-1".to_owned(),
        site_key: Some("site-key".to_owned()),
        data_s: Some("data-s".to_owned()),
    }
}

fn solver(server: &StubServer, timeout: Duration) -> TwoCaptchaSolver {
    TwoCaptchaSolver::new("api-key", Duration::from_millis(5), timeout)
        .with_endpoints(server.url("/in.php"), server.url("/res.php"))
}

async fn service(submit: &str, results: &[&str]) -> StubServer {
    StubServer::start(vec![
        ("/in.php", vec![StubResponse::ok(submit)]),
        ("/res.php", results.iter().copied().map(StubResponse::ok).collect()),
    ])
    .await
}

#[tokio::test]
async fn token_is_polled_until_ready() {
    let server = service(ACCEPTED, &[NOT_READY, NOT_READY, SOLVED]).await;

    let token = solver(&server, Duration::from_secs(5))
        .solve(&challenge())
        .await
        .expect("Expected a token.");

    assert_that(&token).is_equal_to("token-abc".to_owned());

    let submissions = server.requests_to("/in.php");
    let submission = submissions.first().expect("Expected one submission.");
    assert_that(&submission.method).is_equal_to("POST".to_owned());
    for field in ["method=userrecaptcha", "googlekey=site-key", "key=api-key", "data-s=data-s", "json=1"] {
        assert_that(&submission.body.contains(field)).is_true();
    }

    let polls = server.requests_to("/res.php");
    assert_that(&polls).has_length(3);
    let poll = polls.first().expect("Expected a poll.");
    assert_that(&poll.target.contains("action=get")).is_true();
    assert_that(&poll.target.contains("id=42")).is_true();
}

#[tokio::test]
async fn unsolvable_answer_is_reported() {
    let server = service(ACCEPTED, &[r#"{"status":0,"request":"ERROR_CAPTCHA_UNSOLVABLE"}"#]).await;

    let result = solver(&server, Duration::from_secs(5)).solve(&challenge()).await;

    assert_that(&matches!(result, Err(CaptchaError::Unsolvable))).is_true();
}

#[tokio::test]
async fn rejected_submission_reports_the_error_text() {
    let server = service(
        r#"{"status":0,"request":"ERROR_WRONG_USER_KEY","error_text":"The key is wrong"}"#,
        &[SOLVED],
    )
    .await;

    let result = solver(&server, Duration::from_secs(5)).solve(&challenge()).await;

    assert_that(&matches!(result, Err(CaptchaError::Service(ref text)) if text == "The key is wrong")).is_true();
    assert_that(&server.requests_to("/res.php")).has_length(0);
}

#[tokio::test]
async fn rejected_submission_without_error_text_reports_the_code() {
    let server = service(r#"{"status":0,"request":"ERROR_ZERO_BALANCE"}"#, &[SOLVED]).await;

    let result = solver(&server, Duration::from_secs(5)).solve(&challenge()).await;

    assert_that(&matches!(result, Err(CaptchaError::Service(ref text)) if text == "ERROR_ZERO_BALANCE")).is_true();
}

#[tokio::test]
async fn unknown_poll_answer_stops_polling() {
    let server = service(ACCEPTED, &[r#"{"status":0,"request":"ERROR_WRONG_CAPTCHA_ID"}"#]).await;

    let result = solver(&server, Duration::from_secs(5)).solve(&challenge()).await;

    assert_that(&matches!(result, Err(CaptchaError::Service(ref text)) if text == "ERROR_WRONG_CAPTCHA_ID")).is_true();
    assert_that(&server.requests_to("/res.php")).has_length(1);
}

#[tokio::test]
async fn polling_gives_up_at_the_deadline() {
    let server = service(ACCEPTED, &[NOT_READY]).await;
    let timeout = Duration::from_millis(40);

    let result = solver(&server, timeout).solve(&challenge()).await;

    assert_that(&matches!(result, Err(CaptchaError::Timeout(limit)) if limit == timeout)).is_true();
    assert_that(&server.requests_to("/res.php").is_empty()).is_false();
}

#[tokio::test]
async fn challenge_without_site_key_is_not_submitted() {
    let server = service(ACCEPTED, &[SOLVED]).await;
    let challenge = CaptchaChallenge {
        site_key: None,
        ..challenge()
    };

    let result = solver(&server, Duration::from_secs(5)).solve(&challenge).await;

    assert_that(&matches!(result, Err(CaptchaError::Service(_)))).is_true();
    assert_that(&server.requests().is_empty()).is_true();
}
