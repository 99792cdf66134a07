// Lecture pipeline: drives one course's lectures through resolution,
// fetching and remuxing, strictly one lecture at a time.
//
// Each lecture moves Pending -> Resolving -> Fetching -> Remuxing -> Done, or
// ends early in Skipped/Failed. Only one rendering session exists, so the next
// lecture's page is not touched until every artifact of the current one is on
// disk or the lecture has been given up on.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::attachments::fetch_attachments;
use crate::config::{EngineConfig, HttpConfig};
use crate::error::{ErrorKind, LectureError};
use crate::fetcher::SegmentedFetcher;
use crate::locator::SourceLocator;
use crate::metadata::{attachments, video_media_id};
use crate::model::{DownloadJob, LectureMedia, MuxRequest, SourceKind, SourceUrl, StreamRole};
use crate::naming::{CourseLayout, feed_count_path, feed_key, lecture_key, sanitize_component};
use crate::progress::{ProgressEvent, ProgressSink, emit};
use crate::remux::{MuxTool, Remuxer};
use crate::session::{CookieSnapshot, RenderingSession};
use crate::transcript::{TranscriptOutcome, fetch_transcript, transcript_url};
use crate::transport::{AuthenticatedTransport, HttpTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LectureState {
    Pending,
    Resolving,
    Fetching,
    Remuxing,
    Done,
    Skipped(String),
    Failed(String),
}

impl LectureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped(_) | Self::Failed(_))
    }
}

impl fmt::Display for LectureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Resolving => f.write_str("resolving"),
            Self::Fetching => f.write_str("fetching"),
            Self::Remuxing => f.write_str("remuxing"),
            Self::Done => f.write_str("done"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Builds the transport used for one lecture's transfers.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        cookies: &CookieSnapshot,
    ) -> Result<Arc<dyn AuthenticatedTransport>, LectureError>;
}

/// Creates a fresh [`HttpTransport`] per lecture.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    http: HttpConfig,
}

impl HttpTransportFactory {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        cookies: &CookieSnapshot,
    ) -> Result<Arc<dyn AuthenticatedTransport>, LectureError> {
        Ok(Arc::new(HttpTransport::new(&self.http, cookies)?))
    }
}

/// A lecture that did not reach `Done`, with the reason recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LectureFailure {
    pub lecture: String,
    pub title: String,
    pub kind: ErrorKind,
    pub reason: String,
}

impl fmt::Display for LectureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): [{}] {}", self.title, self.lecture, self.kind, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    /// Lectures whose outputs were already on disk; included in `processed`.
    pub up_to_date: usize,
    pub skipped: Vec<LectureFailure>,
    pub failed: Vec<LectureFailure>,
    pub cancelled: bool,
}

impl RunSummary {
    /// True when the run stopped before reaching the last lecture.
    pub fn aborted(&self) -> bool {
        self.cancelled || !self.failed.is_empty()
    }

    pub fn counts_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in self.skipped.iter().chain(&self.failed) {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} already present), {} skipped, {} failed",
            self.processed,
            self.up_to_date,
            self.skipped.len(),
            self.failed.len()
        )?;
        if self.cancelled {
            f.write_str(", cancelled")?;
        }
        Ok(())
    }
}

enum Completion {
    Fetched,
    AlreadyPresent,
}

pub struct LecturePipeline {
    config: EngineConfig,
    layout: CourseLayout,
    transports: Arc<dyn TransportFactory>,
    fetcher: SegmentedFetcher,
    remuxer: Remuxer,
    token: CancellationToken,
    progress: Option<ProgressSink>,
}

impl LecturePipeline {
    pub fn new(
        config: EngineConfig,
        course: &str,
        transports: Arc<dyn TransportFactory>,
        mux: Arc<dyn MuxTool>,
        token: CancellationToken,
        progress: Option<ProgressSink>,
    ) -> Self {
        let layout = CourseLayout::new(&config.output_root, course);
        let fetcher = SegmentedFetcher::new(&config.retry, token.clone(), progress.clone());
        let remuxer = Remuxer::new(mux, progress.clone());
        Self {
            config,
            layout,
            transports,
            fetcher,
            remuxer,
            token,
            progress,
        }
    }

    pub fn layout(&self) -> &CourseLayout {
        &self.layout
    }

    /// Processes `lectures` in order and returns what happened to each.
    ///
    /// Lecture-scoped errors skip the lecture, or end the run when
    /// `skip_on_error` is off. Cancellation is honoured between lectures and
    /// between fetch batches.
    pub async fn run(
        &self,
        lectures: &[LectureMedia],
        session: &mut dyn RenderingSession,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        let total = lectures.len();

        'lectures: for (index, lecture) in lectures.iter().enumerate() {
            if self.token.is_cancelled() {
                info!("Run cancelled before lecture {}", lecture.id);
                summary.cancelled = true;
                break;
            }

            emit(
                &self.progress,
                ProgressEvent::LectureStarted {
                    id: lecture.id.clone(),
                    title: lecture.title.clone(),
                    index,
                    total,
                },
            );

            let units: Vec<&LectureMedia> = if lecture.is_multi_part() {
                info!(lecture = %lecture.id, parts = lecture.parts.len(), "Multi-part lecture");
                lecture.parts.iter().collect()
            } else {
                vec![lecture]
            };

            for unit in units {
                let state = match self.process(unit, session).await {
                    Ok(Completion::Fetched) => {
                        summary.processed += 1;
                        LectureState::Done
                    }
                    Ok(Completion::AlreadyPresent) => {
                        summary.processed += 1;
                        summary.up_to_date += 1;
                        LectureState::Done
                    }
                    Err(e) => {
                        let failure = LectureFailure {
                            lecture: unit.id.clone(),
                            title: unit.title.clone(),
                            kind: e.kind(),
                            reason: e.to_string(),
                        };
                        if matches!(e, LectureError::Cancelled) {
                            warn!(lecture = %unit.id, "Cancelled");
                            summary.failed.push(failure);
                            summary.cancelled = true;
                            self.finish(unit, &LectureState::Failed(e.to_string()));
                            break 'lectures;
                        }
                        if self.config.skip_on_error {
                            warn!(lecture = %unit.id, title = %unit.title, error = %e, "Skipping lecture");
                            summary.skipped.push(failure);
                            LectureState::Skipped(e.to_string())
                        } else {
                            tracing::error!(lecture = %unit.id, title = %unit.title, error = %e, "Lecture failed, aborting run");
                            summary.failed.push(failure);
                            self.finish(unit, &LectureState::Failed(e.to_string()));
                            break 'lectures;
                        }
                    }
                };
                self.finish(unit, &state);
            }
        }

        info!(%summary, "Run finished");
        summary
    }

    fn finish(&self, unit: &LectureMedia, state: &LectureState) {
        info!(lecture = %unit.id, state = %state, "Lecture finished");
        emit(
            &self.progress,
            ProgressEvent::LectureFinished {
                id: unit.id.clone(),
                outcome: state.to_string(),
            },
        );
    }

    fn transition(&self, unit: &LectureMedia, state: LectureState) {
        info!(lecture = %unit.id, title = %unit.title, state = %state, "Lecture state changed");
    }

    #[instrument(skip_all, fields(lecture = %unit.id))]
    async fn process(
        &self,
        unit: &LectureMedia,
        session: &mut dyn RenderingSession,
    ) -> Result<Completion, LectureError> {
        let key = lecture_key(unit.date, &unit.title);
        let prefix = unit.path_prefix.as_deref();
        debug!(key = %key, state = %LectureState::Pending, "Queued");

        if self.outputs_present(unit, &key, prefix).await {
            info!(lecture = %unit.id, key = %key, "Outputs already present, skipping work");
            return Ok(Completion::AlreadyPresent);
        }

        self.transition(unit, LectureState::Resolving);
        let locator = SourceLocator::new(&self.config, self.token.clone());
        let (_, source) = locator.resolve(unit, session).await?;

        let cookies = CookieSnapshot::capture(&*session);
        let transport = self.transports.create(&cookies)?;

        self.transition(unit, LectureState::Fetching);
        for (index, feed) in source.feeds().iter().enumerate() {
            let key = feed_key(&key, index, self.config.alternative_feeds);
            self.fetch_feed(unit, feed, &key, prefix, transport.clone())
                .await?;
        }
        if self.config.alternative_feeds {
            self.record_feed_count(prefix, &key, source.feeds().len())
                .await;
        }

        if self.config.download_transcripts {
            self.fetch_transcript(unit, &key, prefix, transport.as_ref())
                .await;
        }
        if self.config.download_attachments {
            let items = attachments(&unit.metadata);
            if !items.is_empty() {
                fetch_attachments(
                    transport.as_ref(),
                    &self.config.portal_base(),
                    &items,
                    &self.layout.dirty_dir(prefix),
                )
                .await;
            }
        }

        Ok(Completion::Fetched)
    }

    async fn fetch_feed(
        &self,
        unit: &LectureMedia,
        feed: &SourceUrl,
        key: &str,
        prefix: Option<&Path>,
        transport: Arc<dyn AuthenticatedTransport>,
    ) -> Result<(), LectureError> {
        let output = self.final_path(feed.kind, prefix, key);
        if exists(&output).await {
            info!(path = %output.display(), "Final output exists, skipping feed");
            return Ok(());
        }

        match feed.kind {
            SourceKind::DirectFile => {
                let job = DownloadJob {
                    url: feed.url.clone(),
                    destination: output,
                    role: StreamRole::File,
                    pool_size: self.config.pool_size,
                    transport,
                };
                self.fetcher.fetch_direct(&job).await?;
            }
            SourceKind::Manifest => {
                let artifacts = self
                    .fetcher
                    .fetch_streams(
                        &feed.url,
                        transport,
                        self.layout.artifact_path(prefix, key, StreamRole::Video),
                        self.layout.artifact_path(prefix, key, StreamRole::Audio),
                        self.config.pool_size,
                    )
                    .await?;

                self.transition(unit, LectureState::Remuxing);
                self.remuxer
                    .remux(&MuxRequest {
                        video: artifacts.video,
                        audio: artifacts.audio,
                        output,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn fetch_transcript(
        &self,
        unit: &LectureMedia,
        key: &str,
        prefix: Option<&Path>,
        transport: &dyn AuthenticatedTransport,
    ) {
        let Some(media_id) = video_media_id(&unit.metadata) else {
            debug!(lecture = %unit.id, "No video media, no transcript");
            return;
        };
        let url = transcript_url(&self.config.portal_base(), &unit.id, &media_id);
        match fetch_transcript(
            transport,
            &url,
            self.layout.transcript_raw_path(prefix, key),
            self.layout.transcript_clean_path(prefix, key),
        )
        .await
        {
            Ok(TranscriptOutcome::Empty) => info!(lecture = %unit.id, "No transcript available"),
            Ok(_) => {}
            Err(e) => warn!(lecture = %unit.id, error = %e, "Transcript download failed"),
        }
    }

    fn final_path(&self, kind: SourceKind, prefix: Option<&Path>, key: &str) -> std::path::PathBuf {
        match kind {
            SourceKind::DirectFile => self.layout.artifact_path(prefix, key, StreamRole::File),
            SourceKind::Manifest => self.layout.final_path(prefix, key, &self.config.mux.extension),
        }
    }

    async fn record_feed_count(&self, prefix: Option<&Path>, key: &str, count: usize) {
        let path = feed_count_path(&self.layout.dirty_dir(prefix), key);
        if let Err(e) = tokio::fs::write(&path, count.to_string()).await {
            warn!(path = %path.display(), error = %e, "Failed to record feed count");
        }
    }

    /// Feeds expected on disk. With alternative feeds this is the count
    /// recorded by the run that fetched them, or two when none was recorded.
    async fn expected_feeds(&self, prefix: Option<&Path>, key: &str) -> usize {
        if !self.config.alternative_feeds {
            return 1;
        }
        let path = feed_count_path(&self.layout.dirty_dir(prefix), key);
        tokio::fs::read_to_string(&path)
            .await
            .ok()
            .and_then(|text| text.trim().parse::<usize>().ok())
            .filter(|count| (1..=2).contains(count))
            .unwrap_or(2)
    }

    /// Whether everything this lecture would produce is already on disk, so
    /// neither the session nor the network needs to be touched.
    async fn outputs_present(&self, unit: &LectureMedia, key: &str, prefix: Option<&Path>) -> bool {
        let feed_count = self.expected_feeds(prefix, key).await;
        for index in 0..feed_count {
            let key = feed_key(key, index, self.config.alternative_feeds);
            let direct = self.final_path(SourceKind::DirectFile, prefix, &key);
            let muxed = self.final_path(SourceKind::Manifest, prefix, &key);
            if !exists(&direct).await && !exists(&muxed).await {
                return false;
            }
        }

        if self.config.download_transcripts
            && video_media_id(&unit.metadata).is_some()
            && !exists(&self.layout.transcript_clean_path(prefix, key)).await
        {
            return false;
        }

        if self.config.download_attachments {
            let dir = self.layout.dirty_dir(prefix);
            for item in attachments(&unit.metadata) {
                if !exists(&dir.join(sanitize_component(&item.title))).await {
                    return false;
                }
            }
        }
        true
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
