// Plain-HTTP rendering session.
//
// Lesson pages are fetched with the cookies of an already signed-in browser
// session, exported to a cookie file. Pages that only render their player
// through JavaScript still embed the stream URLs in their bootstrap data, which
// is all the page-scan strategies need.

use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lecture_engine::{
    AuthenticatedTransport, Cookie, CookieSnapshot, HttpConfig, HttpTransport, RenderingSession,
    SessionError,
};
use regex::Regex;
use tracing::{debug, trace};

use crate::error::{AppError, Result};

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Parses `name=value` pairs separated by `;` or newlines. Lines starting with
/// `#` are comments.
pub fn parse_cookies(text: &str) -> Vec<Cookie> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| Cookie::new(name, value.trim()))
        })
        .collect()
}

pub fn load_cookie_file(path: &Path) -> Result<Vec<Cookie>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AppError::Config(format!("cannot read cookie file {}: {e}", path.display()))
    })?;
    let cookies = parse_cookies(&text);
    if cookies.is_empty() {
        return Err(AppError::Config(format!(
            "cookie file {} contains no cookies",
            path.display()
        )));
    }
    Ok(cookies)
}

fn extract_title(html: &str) -> String {
    TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .replace("&amp;", "&")
                .replace("&#39;", "'")
                .replace("&quot;", "\"")
                .trim()
                .to_string()
        })
        .unwrap_or_default()
}

pub struct HttpSession {
    transport: HttpTransport,
    cookies: Vec<Cookie>,
    current_url: Option<String>,
    page: String,
}

impl HttpSession {
    pub fn new(http: &HttpConfig, cookies: Vec<Cookie>) -> Result<Self> {
        let transport = HttpTransport::new(http, &CookieSnapshot::from(cookies.clone()))?;
        Ok(Self {
            transport,
            cookies,
            current_url: None,
            page: String::new(),
        })
    }

    async fn load(&mut self, url: &str) -> std::result::Result<(), SessionError> {
        let page = self
            .transport
            .get_text(url)
            .await
            .map_err(|e| SessionError::Other(e.to_string()))?;
        trace!(url = %url, size = page.len(), "Loaded page");
        self.page = page;
        Ok(())
    }
}

#[async_trait]
impl RenderingSession for HttpSession {
    async fn navigate(&mut self, url: &str) -> std::result::Result<(), SessionError> {
        debug!(url = %url, "Navigating");
        self.current_url = Some(url.to_string());
        self.load(url).await
    }

    async fn current_page_text(&mut self) -> std::result::Result<String, SessionError> {
        Ok(self.page.clone())
    }

    async fn current_title(&mut self) -> std::result::Result<String, SessionError> {
        Ok(extract_title(&self.page))
    }

    fn cookies(&self) -> Vec<Cookie> {
        self.cookies.clone()
    }

    /// Polls the page until it carries an element with id `selector`.
    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> std::result::Result<(), SessionError> {
        let marker = format!("id=\"{selector}\"");
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.contains(&marker) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
            if let Some(url) = self.current_url.clone() {
                self.load(&url).await?;
            }
        }
    }
}
