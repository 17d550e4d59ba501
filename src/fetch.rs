//! The fetch module retrieves archive pages through a browser-like session,
//! getting past captcha challenges and reloading the session on failures.
//!
//! One attempt runs the state machine
//! `Idle → Fetching → {CaptchaPresented → Solving → Resubmitted} → Done | Failed`.
//! A failed attempt resets the session and is retried until
//! [`FetchConfig::max_attempts`] is reached, which is fatal for the caller.

use anyhow::{Result, anyhow};
use log::{debug, warn};
use scraper::{Html, Selector};
use tokio::time::{Instant, sleep, timeout};

use crate::config::FetchConfig;
use crate::error::{CaptchaError, FetchError, SessionError};

pub type FetchOutcome = Result<String, FetchError>;

const NOTIFICATION_TITLE: &str = "Niupepa fetcher";

/// A stateful browsing session that can only fetch pages or start over.
#[allow(async_fn_in_trait)]
pub trait BrowserSession {
    /// Navigates to `url` and returns the page source.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser cannot load the page.
    async fn fetch(&mut self, url: &str) -> Result<String, SessionError>;
    /// Returns the source of the page currently shown.
    ///
    /// # Errors
    ///
    /// Returns an error if no page has been loaded yet.
    async fn current(&mut self) -> Result<String, SessionError>;
    /// Injects a captcha token into the current page, resubmits its form and
    /// returns the resulting page source.
    ///
    /// # Errors
    ///
    /// Returns an error if the page has no captcha form or the submission fails.
    async fn submit_captcha(&mut self, token: &str) -> Result<String, SessionError>;
    /// Destroys and recreates the session.
    ///
    /// # Errors
    ///
    /// Returns an error if a new session cannot be started.
    async fn reset(&mut self) -> Result<(), SessionError>;
}

/// An external captcha solving service.
#[allow(async_fn_in_trait)]
pub trait CaptchaSolver {
    /// Returns a token that answers `challenge`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the challenge or gives up on it.
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<String, CaptchaError>;
}

/// Best-effort operator channel. Implementations must not fail.
pub trait Notifier {
    fn notify(&self, title: &str, message: &str);
}

/// Anything that turns a URL into a page body, failing only terminally.
#[allow(async_fn_in_trait)]
pub trait RemoteFetch {
    /// # Errors
    ///
    /// Returns an error once every way of obtaining the page is exhausted.
    async fn fetch(&mut self, url: &str) -> FetchOutcome;
}

/// The captcha found on a page, with what a solving service needs to know.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub page_url: String,
    pub site_key: Option<String>,
    pub data_s: Option<String>,
}

#[derive(Debug)]
enum FetchState {
    Idle,
    Fetching,
    CaptchaPresented(CaptchaChallenge),
    Solving(CaptchaChallenge),
    Resubmitted(String),
    Done(String),
    Failed(AttemptFailure),
}

#[derive(Debug, thiserror::Error)]
enum AttemptFailure {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Captcha(#[from] CaptchaError),
    #[error("post-captcha marker did not appear within {0:?}")]
    MarkerTimeout(std::time::Duration),
}

impl AttemptFailure {
    fn involves_captcha(&self) -> bool {
        !matches!(self, AttemptFailure::Session(_))
    }
}

pub struct FaultTolerantFetcher<S, C, N> {
    session: S,
    solver: C,
    notifier: N,
    config: FetchConfig,
    captcha_selector: Selector,
    recaptcha_selector: Selector,
    marker_selector: Selector,
}

impl<S, C, N> FaultTolerantFetcher<S, C, N>
where
    S: BrowserSession,
    C: CaptchaSolver,
    N: Notifier,
{
    /// # Errors
    ///
    /// Returns an error if one of the configured CSS selectors is invalid.
    pub fn new(session: S, solver: C, notifier: N, config: FetchConfig) -> Result<Self> {
        let captcha_selector = parse_selector(&config.captcha_selector)?;
        let marker_selector = parse_selector(&config.marker_selector)?;
        let recaptcha_selector = parse_selector(".g-recaptcha")?;

        Ok(Self {
            session,
            solver,
            notifier,
            config,
            captcha_selector,
            recaptcha_selector,
            marker_selector,
        })
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Looks for a captcha on the page.
    pub fn detect_captcha(&self, body: &str, page_url: &str) -> Option<CaptchaChallenge> {
        let document = Html::parse_document(body);
        let recaptcha = document.select(&self.recaptcha_selector).next();
        let present = recaptcha.is_some() || document.select(&self.captcha_selector).next().is_some();
        if !present {
            return None;
        }

        let attr = |name: &str| {
            recaptcha
                .and_then(|element| element.value().attr(name))
                .map(str::to_owned)
        };

        Some(CaptchaChallenge {
            page_url: page_url.to_owned(),
            site_key: attr("data-sitekey"),
            data_s: attr("data-s"),
        })
    }

    fn has_marker(&self, body: &str) -> bool {
        Html::parse_document(body)
            .select(&self.marker_selector)
            .next()
            .is_some()
    }

    async fn attempt(&mut self, url: &str) -> Result<String, AttemptFailure> {
        let mut state = FetchState::Idle;
        loop {
            state = match state {
                FetchState::Idle => FetchState::Fetching,
                FetchState::Fetching => match self.session.fetch(url).await {
                    Ok(body) => match self.detect_captcha(&body, url) {
                        Some(challenge) => FetchState::CaptchaPresented(challenge),
                        None => FetchState::Done(body),
                    },
                    Err(error) => {
                        let challenge = error.page().and_then(|body| self.detect_captcha(body, url));
                        match challenge {
                            Some(challenge) => FetchState::CaptchaPresented(challenge),
                            None => FetchState::Failed(error.into()),
                        }
                    }
                },
                FetchState::CaptchaPresented(challenge) => {
                    if self.config.auto_solve_captcha {
                        self.notify("Attempting to solve captcha");
                        FetchState::Solving(challenge)
                    } else {
                        self.notify("Please solve the captcha now");
                        self.await_marker(None).await
                    }
                }
                FetchState::Solving(challenge) => self.solve(&challenge).await,
                FetchState::Resubmitted(body) => self.await_marker(Some(body)).await,
                FetchState::Done(body) => return Ok(body),
                FetchState::Failed(failure) => return Err(failure),
            };
            debug!("Fetch of {url} moved to {}", state_name(&state));
        }
    }

    async fn solve(&mut self, challenge: &CaptchaChallenge) -> FetchState {
        let token = match timeout(self.config.captcha_timeout, self.solver.solve(challenge)).await {
            Ok(Ok(token)) => token,
            Ok(Err(error)) => return FetchState::Failed(error.into()),
            Err(_) => {
                return FetchState::Failed(
                    CaptchaError::Timeout(self.config.captcha_timeout).into(),
                );
            }
        };

        match self.session.submit_captcha(&token).await {
            Ok(body) => FetchState::Resubmitted(body),
            Err(error) => FetchState::Failed(error.into()),
        }
    }

    async fn await_marker(&mut self, mut body: Option<String>) -> FetchState {
        let deadline = Instant::now() + self.config.marker_timeout;
        loop {
            if let Some(page) = body.take() {
                if self.has_marker(&page) {
                    self.notify("Captcha solved, proceeding");
                    return FetchState::Done(page);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return FetchState::Failed(AttemptFailure::MarkerTimeout(
                    self.config.marker_timeout,
                ));
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;

            match self.session.current().await {
                Ok(page) => body = Some(page),
                Err(SessionError::Status { page: Some(page), .. }) => body = Some(page),
                Err(error) => return FetchState::Failed(error.into()),
            }
        }
    }

    fn notify(&self, message: &str) {
        self.notifier.notify(NOTIFICATION_TITLE, message);
    }
}

impl<S, C, N> RemoteFetch for FaultTolerantFetcher<S, C, N>
where
    S: BrowserSession,
    C: CaptchaSolver,
    N: Notifier,
{
    async fn fetch(&mut self, url: &str) -> FetchOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let failure = match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(failure) => failure,
            };

            warn!("Attempt {attempts} for {url} failed: {failure}");
            if attempts >= self.config.max_attempts {
                self.notify("Max retrial exceeded");
                return Err(FetchError::RetriesExhausted {
                    url: url.to_owned(),
                    attempts,
                    cause: failure.to_string(),
                });
            }

            if failure.involves_captcha() {
                self.notify(&format!("{failure}. Page will reload with a new session"));
            }
            if let Err(error) = self.session.reset().await {
                warn!("Session reset failed: {error}");
            }
        }
    }
}

fn state_name(state: &FetchState) -> &'static str {
    match state {
        FetchState::Idle => "idle",
        FetchState::Fetching => "fetching",
        FetchState::CaptchaPresented(_) => "captcha-presented",
        FetchState::Solving(_) => "solving",
        FetchState::Resubmitted(_) => "resubmitted",
        FetchState::Done(_) => "done",
        FetchState::Failed(_) => "failed",
    }
}

pub(crate) fn parse_selector(query: &str) -> Result<Selector> {
    Selector::parse(query).map_err(|e| anyhow!("Invalid CSS selector {query}: {e}"))
}
