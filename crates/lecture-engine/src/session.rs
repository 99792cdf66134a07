//! The rendering collaborator and the cookie state captured from it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The awaited element did not appear before the deadline.
    #[error("timed out after {seconds}s waiting for the page")]
    Timeout { seconds: u64 },

    /// The page changed while it was being read.
    #[error("page content went stale while reading")]
    Stale,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A JavaScript-capable, authenticated browsing session.
///
/// Lifecycle, login and hierarchy traversal belong to the implementor; the
/// engine only navigates to lesson pages and reads them back.
#[async_trait]
pub trait RenderingSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    async fn current_page_text(&mut self) -> Result<String, SessionError>;

    async fn current_title(&mut self) -> Result<String, SessionError>;

    fn cookies(&self) -> Vec<Cookie>;

    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError>;
}

/// Immutable copy of the session cookies, taken once per lecture and shared
/// by every worker of that lecture's transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieSnapshot {
    cookies: Arc<[Cookie]>,
}

impl CookieSnapshot {
    pub fn capture(session: &dyn RenderingSession) -> Self {
        Self::from(session.cookies())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    /// Value for the `Cookie` request header, `None` when there are no cookies.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(self.to_string())
    }
}

impl From<Vec<Cookie>> for CookieSnapshot {
    fn from(cookies: Vec<Cookie>) -> Self {
        Self {
            cookies: cookies.into(),
        }
    }
}

impl fmt::Display for CookieSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, cookie) in self.cookies.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}={}", cookie.name, cookie.value)?;
        }
        Ok(())
    }
}
