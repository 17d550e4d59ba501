//! A plain HTTP stand-in for a browser session.
//!
//! Cookies persist for the lifetime of the session, so a solved captcha keeps
//! working for following requests until [`BrowserSession::reset`] is called.

use log::debug;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use crate::error::SessionError;
use crate::fetch::BrowserSession;

const CAPTCHA_FORM_SELECTOR: &str = "form#captcha-form";
const CAPTCHA_RESPONSE_FIELD: &str = "g-recaptcha-response";

pub struct HttpSession {
    user_agent: String,
    client: Option<Client>,
    current_url: Option<Url>,
    current_body: Option<String>,
}

impl HttpSession {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            client: None,
            current_url: None,
            current_body: None,
        }
    }

    fn client(&mut self) -> Result<Client, SessionError> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .user_agent(self.user_agent.clone())
            .cookie_store(true)
            .build()?;
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Reads a response into the current page. Client errors that carry HTML
    /// still become the current page, since captcha interstitials are served
    /// that way, but are reported as [`SessionError::Status`].
    async fn read(&mut self, response: reqwest::Response) -> Result<String, SessionError> {
        let status = response.status();
        let url = response.url().clone();
        if !status.is_success() && !status.is_client_error() {
            return Err(SessionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                page: None,
            });
        }

        let body = response.text().await?;
        self.current_url = Some(url.clone());
        self.current_body = Some(body.clone());
        if status.is_success() {
            return Ok(body);
        }

        debug!("{url} answered {status} with a page");
        Err(SessionError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            page: Some(body),
        })
    }
}

impl BrowserSession for HttpSession {
    async fn fetch(&mut self, url: &str) -> Result<String, SessionError> {
        let client = self.client()?;
        debug!("GET {url}");
        let response = client.get(url).send().await?;
        self.read(response).await
    }

    async fn current(&mut self) -> Result<String, SessionError> {
        let url = self.current_url.clone().ok_or(SessionError::NoPage)?;
        self.fetch(url.as_str()).await
    }

    async fn submit_captcha(&mut self, token: &str) -> Result<String, SessionError> {
        let page_url = self.current_url.clone().ok_or(SessionError::NoPage)?;
        let body = self.current_body.as_deref().ok_or(SessionError::NoPage)?;
        let (action, mut fields) = captcha_form(body, &page_url)?;
        fields.retain(|(name, _)| name != CAPTCHA_RESPONSE_FIELD);
        fields.push((CAPTCHA_RESPONSE_FIELD.to_owned(), token.to_owned()));

        let client = self.client()?;
        debug!("POST captcha form to {action}");
        let response = client.post(action).form(&fields).send().await?;
        self.read(response).await
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.client = None;
        self.current_url = None;
        self.current_body = None;
        self.client()?;
        Ok(())
    }
}

/// Action URL and prefilled fields of a captcha form.
pub type CaptchaForm = (Url, Vec<(String, String)>);

/// Finds the captcha form of `body` and returns its absolute action URL and
/// the named input fields it already carries.
///
/// # Errors
///
/// Returns [`SessionError::Form`] if the page has no captcha form.
pub fn captcha_form(body: &str, page_url: &Url) -> Result<CaptchaForm, SessionError> {
    let form_selector = selector(CAPTCHA_FORM_SELECTOR)?;
    let input_selector = selector("input[name], textarea[name]")?;

    let document = Html::parse_document(body);
    let form = document
        .select(&form_selector)
        .next()
        .ok_or_else(|| SessionError::Form(page_url.to_string()))?;

    let action = match form.value().attr("action") {
        Some(action) => page_url
            .join(action)
            .map_err(|e| SessionError::Form(format!("bad form action {action}: {e}")))?,
        None => page_url.clone(),
    };

    let fields = form
        .select(&input_selector)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input
                .value()
                .attr("value")
                .map(str::to_owned)
                .unwrap_or_else(|| input.text().collect());
            Some((name.to_owned(), value))
        })
        .collect();

    Ok((action, fields))
}

fn selector(query: &str) -> Result<Selector, SessionError> {
    Selector::parse(query).map_err(|e| SessionError::Form(format!("{query}: {e}")))
}
