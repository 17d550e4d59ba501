#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use niupepa::error::{CaptchaError, FetchError, SessionError, WriteError};
use niupepa::fetch::{BrowserSession, CaptchaChallenge, CaptchaSolver, FetchOutcome, Notifier, RemoteFetch};
use niupepa::page_fetcher::PageSource;
use niupepa::storage::{RecordStore, Storage, Table};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub const CAPTCHA_PAGE: &str =
    r#"<html><body><div class="g-recaptcha" data-sitekey="site-key" data-s="data-s"></div></body></html>"#;
pub const MARKER_PAGE: &str =
    r#"<html><body><div class="pageinfo">Page 1</div><p>Kia ora</p></body></html>"#;

/// A browser session that plays back canned responses.
#[derive(Default)]
pub struct ScriptedSession {
    pub fetches: VecDeque<Result<String, SessionError>>,
    pub current_pages: VecDeque<String>,
    pub submissions: VecDeque<Result<String, SessionError>>,
    pub fetched: Vec<String>,
    pub tokens: Vec<String>,
    pub resets: usize,
}

impl ScriptedSession {
    pub fn new(fetches: Vec<Result<String, SessionError>>) -> Self {
        Self {
            fetches: fetches.into(),
            ..Self::default()
        }
    }

    pub fn with_current(mut self, pages: Vec<&str>) -> Self {
        self.current_pages = pages.into_iter().map(str::to_owned).collect();
        self
    }

    pub fn with_submissions(mut self, submissions: Vec<Result<String, SessionError>>) -> Self {
        self.submissions = submissions.into();
        self
    }
}

impl BrowserSession for ScriptedSession {
    async fn fetch(&mut self, url: &str) -> Result<String, SessionError> {
        self.fetched.push(url.to_owned());
        self.fetches.pop_front().unwrap_or(Err(SessionError::NoPage))
    }

    async fn current(&mut self) -> Result<String, SessionError> {
        self.current_pages.pop_front().ok_or(SessionError::NoPage)
    }

    async fn submit_captcha(&mut self, token: &str) -> Result<String, SessionError> {
        self.tokens.push(token.to_owned());
        self.submissions.pop_front().unwrap_or(Err(SessionError::NoPage))
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.resets += 1;
        Ok(())
    }
}

pub fn page(body: &str) -> Result<String, SessionError> {
    Ok(body.to_owned())
}

pub fn unavailable(url: &str) -> Result<String, SessionError> {
    Err(SessionError::Status {
        url: url.to_owned(),
        status: 503,
        page: None,
    })
}

/// A captcha interstitial served with `429 Too Many Requests`.
pub fn throttled_captcha(url: &str) -> Result<String, SessionError> {
    Err(SessionError::Status {
        url: url.to_owned(),
        status: 429,
        page: Some(CAPTCHA_PAGE.to_owned()),
    })
}

/// A solver that answers with the next canned token; `None` means unsolvable.
#[derive(Clone, Default)]
pub struct ScriptedSolver {
    tokens: Rc<RefCell<VecDeque<Option<String>>>>,
    pub challenges: Rc<RefCell<Vec<CaptchaChallenge>>>,
}

impl ScriptedSolver {
    pub fn new(tokens: Vec<Option<&str>>) -> Self {
        Self {
            tokens: Rc::new(RefCell::new(
                tokens.into_iter().map(|token| token.map(str::to_owned)).collect(),
            )),
            challenges: Rc::default(),
        }
    }
}

impl CaptchaSolver for ScriptedSolver {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<String, CaptchaError> {
        self.challenges.borrow_mut().push(challenge.clone());
        self.tokens
            .borrow_mut()
            .pop_front()
            .flatten()
            .ok_or(CaptchaError::Unsolvable)
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub messages: Rc<RefCell<Vec<String>>>,
}

impl RecordingNotifier {
    pub fn received(&self, fragment: &str) -> bool {
        self.messages
            .borrow()
            .iter()
            .any(|message| message.contains(fragment))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _title: &str, message: &str) {
        self.messages.borrow_mut().push(message.to_owned());
    }
}

/// Serves bodies from a map and counts every call.
#[derive(Default)]
pub struct CountingRemote {
    pages: HashMap<String, String>,
    pub calls: usize,
}

impl CountingRemote {
    pub fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, body)| ((*url).to_owned(), (*body).to_owned()))
                .collect(),
            calls: 0,
        }
    }
}

impl RemoteFetch for CountingRemote {
    async fn fetch(&mut self, url: &str) -> FetchOutcome {
        self.calls += 1;
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::RetriesExhausted {
                url: url.to_owned(),
                attempts: 1,
                cause: "not found".to_owned(),
            })
    }
}

/// A page source over an in-memory site.
#[derive(Default)]
pub struct MapPageSource {
    pages: HashMap<String, String>,
    pub fetched: Vec<String>,
    pub flushes: usize,
}

impl MapPageSource {
    pub fn new(pages: Vec<(String, String)>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl PageSource for MapPageSource {
    async fn fetch_or_load(&mut self, url: &str) -> Result<String> {
        self.fetched.push(url.to_owned());
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no page at {url}"))
    }

    fn flush(&mut self) -> Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

/// Fails the first `failures` batch inserts with a transient error and
/// records the batch size of every attempt.
pub struct FlakyStore {
    pub inner: Storage,
    pub failures: usize,
    pub batch_sizes: Vec<usize>,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: Storage::open_in_memory().expect("Expected an in-memory database."),
            failures,
            batch_sizes: Vec::new(),
        }
    }
}

impl RecordStore for FlakyStore {
    fn insert_batch<R: Table>(&mut self, rows: &[&R], batch_size: usize) -> Result<usize, WriteError> {
        self.batch_sizes.push(batch_size);
        if self.failures > 0 {
            self.failures -= 1;
            return Err(WriteError::Transient("too many SQL variables".to_owned()));
        }
        self.inner.insert_batch(rows, batch_size)
    }

    fn load_keys<R: Table>(&self) -> Result<Vec<(R::Key, i64)>, WriteError> {
        self.inner.load_keys::<R>()
    }
}

/// An archive page with a caption, document text and an optional next link.
pub fn archive_page(number: u32, paragraphs: &[&str], next: Option<&str>) -> String {
    let text: String = paragraphs
        .iter()
        .map(|paragraph| format!("<p>{paragraph}</p>"))
        .collect();
    let next_link = next
        .map(|href| format!(r#"<td align="right"><a href="{href}">next</a></td>"#))
        .unwrap_or_default();

    format!(
        r#"<html><body>
<b>Page {number}</b>
<div class="documenttext"><table><tr><td>{text}</td></tr></table></div>
<div class="navarrowsbottom"><table><tr><td align="left"></td>{next_link}</tr></table></div>
</body></html>"#
    )
}

/// A listing page with one row per `(href, title, date)` issue.
pub fn listing_page(issues: &[(&str, &str, &str)], year_links: &[&str]) -> String {
    let rows: String = issues
        .iter()
        .map(|(href, title, date)| {
            format!(
                r#"<tr><td></td><td></td><td><a href="{href}-en">EN</a><a href="{href}">MI</a></td><td>{title}</td><td>{date}</td></tr>"#
            )
        })
        .collect();
    let years: String = year_links
        .iter()
        .map(|href| format!(r#"<span class="h_item"><a href="{href}">year</a></span>"#))
        .collect();

    format!(
        r#"<html><body><div>{years}</div><table class="date_list">{rows}</table></body></html>"#
    )
}

/// A canned HTTP response.
#[derive(Clone, Debug)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_owned(),
        }
    }

    pub fn ok(body: &str) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }
}

/// One request as the stub server saw it. Header names are lower-cased.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }
}

type Routes = Arc<Mutex<HashMap<String, VecDeque<StubResponse>>>>;

/// A local HTTP server answering each path from its own queue of responses.
/// The last response of a queue is repeated; unknown paths get a 404.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubServer {
    pub async fn start(routes: Vec<(&str, Vec<StubResponse>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Expected a free local port.");
        let address = listener.local_addr().expect("Expected a bound address.");
        let routes: Routes = Arc::new(Mutex::new(
            routes
                .into_iter()
                .map(|(path, responses)| (path.to_owned(), responses.into()))
                .collect(),
        ));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let served = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    let _ = answer(stream, routes, served).await;
                });
            }
        });

        Self {
            base_url: format!("http://{address}"),
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("Expected the request log.").clone()
    }

    /// Requests whose path, without the query, is `path`.
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.target.split('?').next() == Some(path))
            .collect()
    }
}

async fn answer(
    stream: TcpStream,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_owned();
    let target = parts.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or_default();
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    let path = target.split('?').next().unwrap_or_default().to_owned();
    let response = {
        let mut routes = routes.lock().expect("Expected the routes.");
        match routes.get_mut(&path) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    }
    .unwrap_or_else(|| StubResponse::new(404, "not found"));

    requests.lock().expect("Expected the request log.").push(RecordedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let mut head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let mut stream = reader.into_inner();
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body.as_bytes()).await?;
    stream.shutdown().await
}
