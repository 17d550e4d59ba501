use std::time::{Duration, Instant};

use niupepa::config::FetchConfig;
use niupepa::error::SessionError;
use niupepa::fetch::{BrowserSession, FaultTolerantFetcher, Notifier, RemoteFetch};
use niupepa::notify::CommandNotifier;
use niupepa::session::{HttpSession, captcha_form};
use spectral::prelude::*;
use url::Url;

use crate::fakes::{MARKER_PAGE, RecordingNotifier, ScriptedSolver, StubResponse, StubServer};

mod fakes;

const CAPTCHA_FORM: &str = r#"<html><body>
<form id="captcha-form" action="/cgi-bin/verify" method="post">
  <input type="hidden" name="return" value="page-4">
  <textarea name="g-recaptcha-response"></textarea>
  <input type="submit" value="Submit">
</form>
</body></html>"#;

const CAPTCHA_INTERSTITIAL: &str = r#"<html><body>
<form id="captcha-form" action="/verify" method="post">
  <input type="hidden" name="return" value="page-4">
  <div class="g-recaptcha" data-sitekey="site-key"></div>
</form>
</body></html>"#;

fn page_url() -> Url {
    Url::parse("http://archive.test/cgi-bin/library?a=d&d=page-4").expect("Expected a valid URL.")
}

#[test]
fn captcha_form_action_is_absolute() {
    let (action, _) = captcha_form(CAPTCHA_FORM, &page_url()).expect("Expected a captcha form.");

    assert_that(&action.as_str()).is_equal_to("http://archive.test/cgi-bin/verify");
}

#[test]
fn captcha_form_keeps_named_fields() {
    let (_, fields) = captcha_form(CAPTCHA_FORM, &page_url()).expect("Expected a captcha form.");

    assert_that(&fields).is_equal_to(vec![
        ("return".to_owned(), "page-4".to_owned()),
        ("g-recaptcha-response".to_owned(), String::new()),
    ]);
}

#[test]
fn form_without_action_posts_back_to_the_page() {
    let body = r#"<form id="captcha-form"><input name="token" value="x"></form>"#;

    let (action, _) = captcha_form(body, &page_url()).expect("Expected a captcha form.");

    assert_that(&action).is_equal_to(page_url());
}

#[test]
fn page_without_captcha_form_is_an_error() {
    let result = captcha_form("<html><body><p>Kia ora</p></body></html>", &page_url());

    assert_that(&matches!(result, Err(SessionError::Form(_)))).is_true();
}

#[test]
fn notifier_command_line_needs_a_program() {
    assert_that(&CommandNotifier::from_command_line("   ").is_none()).is_true();
    assert_that(&CommandNotifier::from_command_line("notify-send -u critical").is_some()).is_true();
}

#[tokio::test]
async fn client_error_page_becomes_the_current_page() {
    let server = StubServer::start(vec![
        ("/page", vec![StubResponse::new(429, CAPTCHA_INTERSTITIAL)]),
        ("/verify", vec![StubResponse::ok(MARKER_PAGE)]),
    ])
    .await;
    let mut session = HttpSession::new("niupepa-test");

    let error = session
        .fetch(&server.url("/page"))
        .await
        .expect_err("Expected the 429 to be reported.");
    assert_that(&matches!(error, SessionError::Status { status: 429, .. })).is_true();
    assert_that(&error.page().is_some_and(|page| page.contains("g-recaptcha"))).is_true();

    let body = session
        .submit_captcha("token-1")
        .await
        .expect("Expected the captcha form to be posted.");

    assert_that(&body).is_equal_to(MARKER_PAGE.to_owned());
    let posts = server.requests_to("/verify");
    let post = posts.first().expect("Expected one form submission.");
    assert_that(&post.method).is_equal_to("POST".to_owned());
    assert_that(&post.body.contains("return=page-4")).is_true();
    assert_that(&post.body.contains("g-recaptcha-response=token-1")).is_true();
}

#[tokio::test]
async fn server_error_carries_no_page() {
    let server = StubServer::start(vec![("/down", vec![StubResponse::new(503, "busy")])]).await;
    let mut session = HttpSession::new("niupepa-test");

    let error = session
        .fetch(&server.url("/down"))
        .await
        .expect_err("Expected the 503 to be reported.");

    assert_that(&matches!(error, SessionError::Status { status: 503, page: None, .. })).is_true();
    assert_that(&matches!(session.current().await, Err(SessionError::NoPage))).is_true();
}

#[tokio::test]
async fn current_reloads_the_current_page() {
    let server = StubServer::start(vec![("/page", vec![StubResponse::ok("<p>Kia ora</p>")])]).await;
    let mut session = HttpSession::new("niupepa-test");
    session.fetch(&server.url("/page")).await.expect("Expected the page.");

    let body = session.current().await.expect("Expected the page again.");

    assert_that(&body).is_equal_to("<p>Kia ora</p>".to_owned());
    assert_that(&server.requests_to("/page")).has_length(2);
}

#[tokio::test]
async fn cookies_last_until_the_session_is_reset() {
    let server = StubServer::start(vec![
        (
            "/login",
            vec![StubResponse::ok("<p>ok</p>").with_header("Set-Cookie", "visitor=abc; Path=/")],
        ),
        ("/page", vec![StubResponse::ok("<p>Kia ora</p>")]),
    ])
    .await;
    let mut session = HttpSession::new("niupepa-test");

    session.fetch(&server.url("/login")).await.expect("Expected the login page.");
    session.fetch(&server.url("/page")).await.expect("Expected the page.");
    session.reset().await.expect("Expected a fresh session.");
    session.fetch(&server.url("/page")).await.expect("Expected the page.");

    let cookies: Vec<Option<String>> = server
        .requests_to("/page")
        .iter()
        .map(|request| request.header("cookie").map(str::to_owned))
        .collect();
    assert_that(&cookies).is_equal_to(vec![Some("visitor=abc".to_owned()), None]);
}

#[tokio::test]
async fn throttled_captcha_is_solved_over_http() {
    let server = StubServer::start(vec![
        ("/page", vec![StubResponse::new(429, CAPTCHA_INTERSTITIAL)]),
        ("/verify", vec![StubResponse::ok(MARKER_PAGE)]),
    ])
    .await;
    let solver = ScriptedSolver::new(vec![Some("token-1")]);
    let config = FetchConfig {
        marker_timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(5),
        ..FetchConfig::default()
    };
    let mut fetcher = FaultTolerantFetcher::new(
        HttpSession::new("niupepa-test"),
        solver.clone(),
        RecordingNotifier::default(),
        config,
    )
    .expect("Expected valid selectors.");
    let url = server.url("/page");

    let body = fetcher.fetch(&url).await.expect("Expected the page behind the captcha.");

    assert_that(&body).is_equal_to(MARKER_PAGE.to_owned());
    let challenges = solver.challenges.borrow();
    let challenge = challenges.first().expect("Expected one challenge.");
    assert_that(&challenge.page_url).is_equal_to(url);
    assert_that(&challenge.site_key).is_equal_to(Some("site-key".to_owned()));
    assert_that(&server.requests_to("/page")).has_length(1);
}

#[cfg(unix)]
#[test]
fn slow_notifier_does_not_block_the_caller() {
    let notifier = CommandNotifier::new("sh", vec!["-c".to_owned(), "sleep 2".to_owned()]);
    let started = Instant::now();

    notifier.notify("Niupepa fetcher", "Please solve the captcha now");

    assert_that(&(started.elapsed() < Duration::from_secs(1))).is_true();
}

#[test]
fn missing_notifier_program_is_only_logged() {
    let notifier = CommandNotifier::new("/nonexistent/niupepa-notifier", Vec::new());

    notifier.notify("Niupepa fetcher", "Max retrial exceeded");
}
