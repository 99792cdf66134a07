//! In-memory transport shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use manifest::ByteSpan;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::LectureError;
use crate::transport::{AuthenticatedTransport, ChunkCallback};

/// Serves fixed bodies by URL and records every request.
#[derive(Default)]
pub struct MapTransport {
    pub bodies: HashMap<String, Vec<u8>>,
    pub fail: Vec<String>,
    pub requests: AtomicUsize,
    pub seen: Mutex<Vec<String>>,
    /// Time each ranged/segment request is held open.
    pub delay: Option<Duration>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl MapTransport {
    pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lookup(&self, url: &str) -> Result<Vec<u8>, LectureError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(url.to_string());
        if self.fail.iter().any(|f| f == url) {
            return Err(LectureError::transfer(url, "connection reset", false));
        }
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| LectureError::transfer(url, "404", false))
    }
}

#[async_trait]
impl AuthenticatedTransport for MapTransport {
    async fn get_text(&self, url: &str) -> Result<String, LectureError> {
        Ok(String::from_utf8_lossy(&self.lookup(url)?).into_owned())
    }

    async fn get_bytes(&self, url: &str, _range: Option<ByteSpan>) -> Result<Bytes, LectureError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.lookup(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Bytes::from(result?))
    }

    async fn head(&self, _url: &str) -> Result<Option<u64>, LectureError> {
        Ok(None)
    }

    async fn download_to(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        on_chunk: ChunkCallback<'_>,
    ) -> Result<u64, LectureError> {
        let body = self.lookup(url)?;
        sink.write_all(&body).await?;
        sink.flush().await?;
        on_chunk(body.len() as u64);
        Ok(body.len() as u64)
    }
}
