// Authenticated HTTP access for one lecture.
//
// A transport is built from a cookie snapshot taken when the lecture page was
// rendered. Workers only ever read from it; the snapshot is never refreshed
// mid-lecture.

use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use manifest::ByteSpan;
use reqwest::header::{CONTENT_LENGTH, COOKIE, HeaderMap, HeaderValue, RANGE};
use reqwest::{Client, Response};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::HttpConfig;
use crate::error::LectureError;
use crate::session::CookieSnapshot;

/// Called with the size of every chunk written by [`AuthenticatedTransport::download_to`].
pub type ChunkCallback<'a> = &'a (dyn Fn(u64) + Send + Sync);

#[async_trait]
pub trait AuthenticatedTransport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, LectureError>;

    async fn get_bytes(&self, url: &str, range: Option<ByteSpan>) -> Result<Bytes, LectureError>;

    /// Content length reported by a HEAD request, if any.
    async fn head(&self, url: &str) -> Result<Option<u64>, LectureError>;

    /// Streams the body of `url` into `sink`, returning the bytes written.
    async fn download_to(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64, LectureError>;
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Length declared by the `Content-Length` header. `Response::content_length`
/// reports the body size of a HEAD response, which is always empty.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// `reqwest`-backed transport carrying the lecture's cookies on every request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig, cookies: &CookieSnapshot) -> Result<Self, LectureError> {
        install_rustls_provider();

        let mut headers = HttpConfig::default_headers();
        for (name, value) in config.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(cookie) = cookies.header_value() {
            let mut value = HeaderValue::from_str(&cookie)
                .map_err(|e| LectureError::config(format!("invalid cookie value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .map_err(|e| LectureError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Response, LectureError> {
        let response = request
            .send()
            .await
            .map_err(|e| LectureError::from_reqwest(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LectureError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AuthenticatedTransport for HttpTransport {
    async fn get_text(&self, url: &str) -> Result<String, LectureError> {
        let response = self.send(self.client.get(url), url).await?;
        response
            .text()
            .await
            .map_err(|e| LectureError::from_reqwest(url, e))
    }

    async fn get_bytes(&self, url: &str, range: Option<ByteSpan>) -> Result<Bytes, LectureError> {
        let mut request = self.client.get(url);
        if let Some(span) = range {
            request = request.header(RANGE, span.range_header());
        }
        let response = self.send(request, url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LectureError::from_reqwest(url, e))?;
        trace!(url = %url, size = bytes.len(), "Fetched body");
        Ok(bytes)
    }

    async fn head(&self, url: &str) -> Result<Option<u64>, LectureError> {
        let response = self.send(self.client.head(url), url).await?;
        Ok(content_length(response.headers()))
    }

    async fn download_to(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64, LectureError> {
        let response = self.send(self.client.get(url), url).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LectureError::from_reqwest(url, e))?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }
        sink.flush().await?;

        Ok(written)
    }
}
