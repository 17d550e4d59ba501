//! Client for the 2Captcha recaptcha solving service.

use std::time::Duration;

use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{Instant, sleep};

use crate::constants::{TWO_CAPTCHA_RESULT_URL, TWO_CAPTCHA_SUBMIT_URL, USER_AGENT};
use crate::error::CaptchaError;
use crate::fetch::{CaptchaChallenge, CaptchaSolver};

const UNSOLVABLE: &str = "ERROR_CAPTCHA_UNSOLVABLE";
const NOT_READY: &str = "CAPCHA_NOT_READY";

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    status: u8,
    request: String,
    #[serde(default)]
    error_text: Option<String>,
}

pub struct TwoCaptchaSolver {
    client: Client,
    api_key: String,
    submit_url: String,
    result_url: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl TwoCaptchaSolver {
    pub fn new(api_key: impl Into<String>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            submit_url: TWO_CAPTCHA_SUBMIT_URL.to_owned(),
            result_url: TWO_CAPTCHA_RESULT_URL.to_owned(),
            poll_interval,
            timeout,
        }
    }

    /// Points the solver at another deployment of the same API.
    pub fn with_endpoints(mut self, submit_url: impl Into<String>, result_url: impl Into<String>) -> Self {
        self.submit_url = submit_url.into();
        self.result_url = result_url.into();
        self
    }

    async fn submit(&self, challenge: &CaptchaChallenge) -> Result<String, CaptchaError> {
        let site_key = challenge
            .site_key
            .as_deref()
            .ok_or_else(|| CaptchaError::Service("captcha has no site key".to_owned()))?;

        let mut form = vec![
            ("method", "userrecaptcha"),
            ("googlekey", site_key),
            ("key", self.api_key.as_str()),
            ("pageurl", challenge.page_url.as_str()),
            ("useragent", USER_AGENT),
            ("json", "1"),
        ];
        if let Some(data_s) = challenge.data_s.as_deref() {
            form.push(("data-s", data_s));
        }

        let response: ServiceResponse = self
            .client
            .post(&self.submit_url)
            .form(&form)
            .send()
            .await
            .map_err(service_error)?
            .json()
            .await
            .map_err(service_error)?;

        match response.error_text.filter(|text| !text.is_empty()) {
            Some(error_text) => Err(CaptchaError::Service(error_text)),
            None if response.status == 1 => Ok(response.request),
            None => Err(CaptchaError::Service(response.request)),
        }
    }

    async fn poll(&self, request_id: &str) -> Result<String, CaptchaError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let response: ServiceResponse = self
                .client
                .get(&self.result_url)
                .query(&[
                    ("key", self.api_key.as_str()),
                    ("action", "get"),
                    ("id", request_id),
                    ("json", "1"),
                ])
                .send()
                .await
                .map_err(service_error)?
                .json()
                .await
                .map_err(service_error)?;

            if response.status == 1 {
                return Ok(response.request);
            }
            match response.request.as_str() {
                UNSOLVABLE => return Err(CaptchaError::Unsolvable),
                NOT_READY => debug!("Captcha {request_id} not ready yet"),
                other => return Err(CaptchaError::Service(other.to_owned())),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(CaptchaError::Timeout(self.timeout));
            }
            sleep(self.poll_interval).await;
        }
    }
}

impl CaptchaSolver for TwoCaptchaSolver {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<String, CaptchaError> {
        let request_id = self.submit(challenge).await?;
        info!("Submitted captcha of {} as request {request_id}", challenge.page_url);
        self.poll(&request_id).await
    }
}

fn service_error(error: reqwest::Error) -> CaptchaError {
    CaptchaError::Service(error.to_string())
}
