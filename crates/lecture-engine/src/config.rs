use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use url::Url;

use crate::error::LectureError;
use crate::retry::RetryTable;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Number of parallel segment transfers per lecture.
pub const DEFAULT_POOL_SIZE: usize = 50;

/// HTTP client options for the authenticated transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Maximum idle connections to keep per host.
    pub pool_max_idle_per_host: usize,

    /// Duration to keep idle connections alive before closing.
    pub pool_idle_timeout: Duration,

    /// Extra headers sent with every request, merged over the defaults.
    pub headers: HeaderMap,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            pool_max_idle_per_host: DEFAULT_POOL_SIZE,
            pool_idle_timeout: Duration::from_secs(30),
            headers: HttpConfig::default_headers(),
        }
    }
}

impl HttpConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers
    }
}

/// External mux tool settings.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Program name or path, resolved through `PATH` when bare.
    pub program: String,
    /// Audio codec for the output container. Video is always stream-copied.
    pub audio_codec: String,
    /// Extension of the final container.
    pub extension: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_owned(),
            audio_codec: "ac3".to_owned(),
            extension: "mp4".to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root below which one directory per course is created.
    pub output_root: PathBuf,

    pub pool_size: usize,

    /// Fetch up to two feeds per lecture instead of one.
    pub alternative_feeds: bool,

    /// When false the first lecture-scoped failure aborts the run.
    pub skip_on_error: bool,

    pub download_transcripts: bool,

    pub download_attachments: bool,

    /// Portal origin, e.g. `https://echo360.org.uk`.
    pub portal_host: Url,

    /// Canonical streaming host; `content.<portal host>` when unset.
    pub streaming_host: Option<String>,

    /// Element id that marks a fully rendered lecture page.
    pub player_selector: Option<String>,

    pub render_timeout: Duration,

    pub retry: RetryTable,

    pub http: HttpConfig,

    pub mux: MuxConfig,
}

impl EngineConfig {
    pub fn new(portal_host: Url) -> Self {
        Self {
            output_root: PathBuf::from("."),
            pool_size: DEFAULT_POOL_SIZE,
            alternative_feeds: false,
            skip_on_error: true,
            download_transcripts: false,
            download_attachments: true,
            portal_host,
            streaming_host: None,
            player_selector: None,
            render_timeout: Duration::from_secs(30),
            retry: RetryTable::default(),
            http: HttpConfig::default(),
            mux: MuxConfig::default(),
        }
    }

    /// Host that offloaded manifest URIs are rewritten to.
    pub fn streaming_host(&self) -> Result<String, LectureError> {
        if let Some(host) = &self.streaming_host {
            return Ok(host.clone());
        }
        let host = self.portal_host.host_str().ok_or_else(|| {
            LectureError::config(format!("portal URL {} has no host", self.portal_host))
        })?;
        Ok(match self.portal_host.port() {
            Some(port) => format!("content.{host}:{port}"),
            None => format!("content.{host}"),
        })
    }

    /// Portal origin without a trailing slash.
    pub fn portal_base(&self) -> String {
        self.portal_host.as_str().trim_end_matches('/').to_string()
    }

    /// URL of the page that renders a single lesson.
    pub fn lesson_page_url(&self, lesson_id: &str) -> String {
        format!("{}/lesson/{}/classroom", self.portal_base(), lesson_id)
    }

    pub fn validate(&self) -> Result<(), LectureError> {
        if self.pool_size == 0 {
            return Err(LectureError::config("pool_size must be at least 1"));
        }
        if self.mux.program.trim().is_empty() {
            return Err(LectureError::config("mux program must not be empty"));
        }
        self.streaming_host().map(|_| ())
    }
}
