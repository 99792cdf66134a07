use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use crate::transport::AuthenticatedTransport;

/// One recorded lecture as supplied by the course hierarchy.
///
/// Multi-part lectures carry their parts in `parts`; a part never has parts
/// of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct LectureMedia {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    /// Raw metadata blob the resolution strategies read from.
    pub metadata: Arc<Value>,
    /// Folder prefix below `dirty/` and `clean/`, shared by all parts.
    pub path_prefix: Option<PathBuf>,
    pub parts: Vec<LectureMedia>,
}

impl LectureMedia {
    pub fn is_multi_part(&self) -> bool {
        !self.parts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    DirectFile,
    Manifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    pub url: String,
    pub kind: SourceKind,
}

impl SourceUrl {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let kind = if manifest::is_manifest_url(&url) {
            SourceKind::Manifest
        } else {
            SourceKind::DirectFile
        };
        Self { url, kind }
    }
}

/// The accepted stream location(s) of one lecture: a primary feed and, when
/// alternative feeds are enabled, at most one more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    feeds: Vec<SourceUrl>,
}

impl ResolvedSource {
    /// Keeps the first one or two candidates. Returns `None` for an empty list.
    pub fn from_candidates(candidates: Vec<String>, alternative_feeds: bool) -> Option<Self> {
        let limit = if alternative_feeds { 2 } else { 1 };
        let feeds: Vec<SourceUrl> = candidates
            .into_iter()
            .take(limit)
            .map(SourceUrl::new)
            .collect();
        (!feeds.is_empty()).then_some(Self { feeds })
    }

    pub fn primary(&self) -> &SourceUrl {
        &self.feeds[0]
    }

    pub fn feeds(&self) -> &[SourceUrl] {
        &self.feeds
    }
}

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Video,
    Audio,
    /// A progressive file carrying both tracks.
    File,
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        })
    }
}

/// One artifact transfer. Not retained after it completes.
#[derive(Clone)]
pub struct DownloadJob {
    pub url: String,
    pub destination: PathBuf,
    pub role: StreamRole,
    pub pool_size: usize,
    pub transport: Arc<dyn AuthenticatedTransport>,
}

impl fmt::Debug for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadJob")
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("role", &self.role)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxRequest {
    pub video: PathBuf,
    pub audio: Option<PathBuf>,
    pub output: PathBuf,
}
