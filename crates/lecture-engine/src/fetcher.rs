// Segmented Fetcher: turns one resolved feed into local artifact files.
//
// Manifest feeds are split into video and audio roles that transfer side by
// side; a failure in one role never cancels the other. Both roles draw from
// one pool of `pool_size` transfer slots, and segments are requested one batch
// of `pool_size` at a time and written in playlist order. Direct files are a
// single streamed transfer holding one slot. Every artifact is written to
// `<name>.part` and renamed when complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, stream};
use indicatif::ProgressStyle;
use manifest::{
    ManifestError, SegmentList, SegmentRef, is_manifest_url, is_media_playlist,
    parse_segment_list, resolve_variants,
};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::error::{ErrorKind, LectureError};
use crate::model::{DownloadJob, StreamRole};
use crate::naming::{partial_path, remove_if_present};
use crate::progress::{ProgressEvent, ProgressSink, emit};
use crate::retry::{RetryAction, RetryPolicy, RetryTable, retry_with_backoff};
use crate::transport::AuthenticatedTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Fetched { bytes: u64 },
    /// The destination already existed; nothing was transferred.
    Skipped,
}

/// Artifacts produced for a manifest feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamArtifacts {
    pub video: PathBuf,
    pub audio: Option<PathBuf>,
}

pub struct SegmentedFetcher {
    retry: RetryPolicy,
    token: CancellationToken,
    progress: Option<ProgressSink>,
}

impl SegmentedFetcher {
    pub fn new(
        retry: &RetryTable,
        token: CancellationToken,
        progress: Option<ProgressSink>,
    ) -> Self {
        Self {
            retry: retry.policy_for(ErrorKind::TransferError),
            token,
            progress,
        }
    }

    /// Fetches the video and, when the manifest lists one, the audio
    /// rendition of a manifest feed.
    ///
    /// Both roles run to completion before an error is reported. At most
    /// `pool_size` transfers are in flight across the two roles.
    #[instrument(skip_all, fields(manifest = %manifest_url))]
    pub async fn fetch_streams(
        &self,
        manifest_url: &str,
        transport: Arc<dyn AuthenticatedTransport>,
        video_dest: PathBuf,
        audio_dest: PathBuf,
        pool_size: usize,
    ) -> Result<StreamArtifacts, LectureError> {
        let text = self.get_text(transport.as_ref(), manifest_url).await?;
        let pair = resolve_variants(manifest_url, &text)
            .map_err(|e| LectureError::manifest(manifest_url, e))?;
        debug!(
            video = %pair.video,
            audio = ?pair.audio,
            combined = pair.combined,
            "Interpreted manifest"
        );

        let video_job = DownloadJob {
            url: pair.video,
            destination: video_dest,
            role: StreamRole::Video,
            pool_size,
            transport: transport.clone(),
        };
        let audio_job = pair.audio.map(|url| DownloadJob {
            url,
            destination: audio_dest,
            role: StreamRole::Audio,
            pool_size,
            transport,
        });

        let slots = Semaphore::new(pool_size.max(1));
        let audio = async {
            match &audio_job {
                Some(job) => Some(self.fetch_rendition(job, &slots).await),
                None => None,
            }
        };
        let (video_result, audio_result) =
            futures::join!(self.fetch_rendition(&video_job, &slots), audio);

        if let Some(Err(e)) = &audio_result {
            warn!(error = %e, "Audio transfer failed");
        }
        video_result?;
        if let Some(result) = audio_result {
            result?;
        }

        Ok(StreamArtifacts {
            video: video_job.destination,
            audio: audio_job.map(|job| job.destination),
        })
    }

    /// Fetches one rendition. A `.m3u8` URL is expanded into its segments;
    /// anything else is transferred as a single file.
    pub async fn fetch_playlist(&self, job: &DownloadJob) -> Result<ArtifactOutcome, LectureError> {
        let slots = Semaphore::new(job.pool_size.max(1));
        self.fetch_rendition(job, &slots).await
    }

    async fn fetch_rendition(
        &self,
        job: &DownloadJob,
        slots: &Semaphore,
    ) -> Result<ArtifactOutcome, LectureError> {
        if exists(&job.destination).await {
            return Ok(self.skip(job));
        }
        if !is_manifest_url(&job.url) {
            debug!(url = %job.url, role = %job.role, "Rendition is not a segment playlist, streaming it whole");
            return self.stream_file(job, slots).await;
        }

        let text = self.get_text(job.transport.as_ref(), &job.url).await?;
        if !is_media_playlist(&text) {
            return Err(LectureError::manifest(
                job.url.clone(),
                ManifestError::invalid_playlist("rendition is not a media playlist"),
            ));
        }

        let list = parse_segment_list(&text, &job.url)
            .map_err(|e| LectureError::manifest(job.url.clone(), e))?;
        if list.is_empty() {
            return Err(LectureError::manifest(
                job.url.clone(),
                ManifestError::invalid_playlist("playlist lists no segments"),
            ));
        }

        self.fetch_segments(job, &list, slots).await
    }

    /// Streams a progressive file into its destination.
    pub async fn fetch_direct(&self, job: &DownloadJob) -> Result<ArtifactOutcome, LectureError> {
        if exists(&job.destination).await {
            return Ok(self.skip(job));
        }
        let slots = Semaphore::new(1);
        self.stream_file(job, &slots).await
    }

    #[instrument(skip_all, fields(url = %job.url, role = %job.role))]
    async fn stream_file(
        &self,
        job: &DownloadJob,
        slots: &Semaphore,
    ) -> Result<ArtifactOutcome, LectureError> {
        prepare_parent(&job.destination).await?;
        let _slot = acquire(slots).await?;

        let total_bytes = job.transport.head(&job.url).await.ok().flatten();
        let span = Span::current();
        span.pb_set_style(&bar_style(
            "{span_child_prefix}{spinner:.green} [{bar:20.green/white}] {bytes}/{total_bytes} {msg}",
        ));
        span.pb_set_message(&artifact_label(job));
        if let Some(total) = total_bytes {
            span.pb_set_length(total);
        }
        emit(
            &self.progress,
            ProgressEvent::ArtifactStarted {
                role: job.role,
                path: job.destination.clone(),
                total_bytes,
                total_segments: None,
            },
        );

        let part = partial_path(&job.destination);
        let result = retry_with_backoff(&self.retry, &self.token, |_| {
            let part = part.as_path();
            async move { RetryAction::from_result(self.stream_to(job, part).await) }
        })
        .await;

        self.finish(job, &part, result).await
    }

    async fn stream_to(&self, job: &DownloadJob, part: &Path) -> Result<u64, LectureError> {
        let mut file = File::create(part).await?;
        let role = job.role;
        let span = Span::current();
        span.pb_set_position(0);
        let on_chunk = |bytes: u64| {
            span.pb_inc(bytes);
            emit(&self.progress, ProgressEvent::BytesWritten { role, bytes });
        };
        let bytes = job
            .transport
            .download_to(&job.url, &mut file, &on_chunk)
            .await?;
        file.flush().await?;
        Ok(bytes)
    }

    #[instrument(skip_all, fields(url = %job.url, role = %job.role, segments = list.len()))]
    async fn fetch_segments(
        &self,
        job: &DownloadJob,
        list: &SegmentList,
        slots: &Semaphore,
    ) -> Result<ArtifactOutcome, LectureError> {
        prepare_parent(&job.destination).await?;
        let span = Span::current();
        span.pb_set_style(&bar_style(
            "{span_child_prefix}{spinner:.yellow} [{bar:20.yellow/white}] {pos}/{len} segments {msg}",
        ));
        span.pb_set_message(&artifact_label(job));
        span.pb_set_length(list.len() as u64);
        emit(
            &self.progress,
            ProgressEvent::ArtifactStarted {
                role: job.role,
                path: job.destination.clone(),
                total_bytes: None,
                total_segments: Some(list.len()),
            },
        );

        let part = partial_path(&job.destination);
        let result = self.write_segments(job, list, &part, slots).await;
        self.finish(job, &part, result).await
    }

    async fn write_segments(
        &self,
        job: &DownloadJob,
        list: &SegmentList,
        part: &Path,
        slots: &Semaphore,
    ) -> Result<u64, LectureError> {
        let mut writer = BufWriter::new(File::create(part).await?);
        let requests: Vec<&SegmentRef> = list.requests().collect();
        let total = requests.len();
        let pool_size = job.pool_size.max(1);
        let mut completed = 0usize;
        let mut written = 0u64;
        let span = Span::current();

        for batch in requests.chunks(pool_size) {
            if self.token.is_cancelled() {
                return Err(LectureError::Cancelled);
            }

            let mut bodies = stream::iter(batch.iter().copied())
                .map(|segment| self.fetch_segment(job.transport.as_ref(), segment, slots))
                .buffered(pool_size);

            while let Some(body) = bodies.next().await {
                let body = body?;
                writer.write_all(&body).await?;
                completed += 1;
                written += body.len() as u64;
                span.pb_inc(1);
                emit(
                    &self.progress,
                    ProgressEvent::BytesWritten {
                        role: job.role,
                        bytes: body.len() as u64,
                    },
                );
                emit(
                    &self.progress,
                    ProgressEvent::SegmentCompleted {
                        role: job.role,
                        completed,
                        total,
                    },
                );
            }
        }

        writer.flush().await?;
        Ok(written)
    }

    async fn fetch_segment(
        &self,
        transport: &dyn AuthenticatedTransport,
        segment: &SegmentRef,
        slots: &Semaphore,
    ) -> Result<Bytes, LectureError> {
        retry_with_backoff(&self.retry, &self.token, |_| async move {
            let _slot = match acquire(slots).await {
                Ok(slot) => slot,
                Err(e) => return RetryAction::Fail(e),
            };
            RetryAction::from_result(transport.get_bytes(&segment.uri, segment.byte_range).await)
        })
        .await
    }

    async fn get_text(
        &self,
        transport: &dyn AuthenticatedTransport,
        url: &str,
    ) -> Result<String, LectureError> {
        retry_with_backoff(&self.retry, &self.token, |_| async move {
            RetryAction::from_result(transport.get_text(url).await)
        })
        .await
    }

    /// Renames the partial file on success and removes it on failure.
    async fn finish(
        &self,
        job: &DownloadJob,
        part: &Path,
        result: Result<u64, LectureError>,
    ) -> Result<ArtifactOutcome, LectureError> {
        match result {
            Ok(bytes) => {
                tokio::fs::rename(part, &job.destination).await?;
                info!(
                    role = %job.role,
                    path = %job.destination.display(),
                    bytes,
                    "Artifact written"
                );
                emit(
                    &self.progress,
                    ProgressEvent::ArtifactFinished {
                        role: job.role,
                        path: job.destination.clone(),
                    },
                );
                Ok(ArtifactOutcome::Fetched { bytes })
            }
            Err(e) => {
                remove_if_present(part).await;
                Err(e)
            }
        }
    }

    fn skip(&self, job: &DownloadJob) -> ArtifactOutcome {
        debug!(role = %job.role, path = %job.destination.display(), "Artifact exists, skipping transfer");
        emit(
            &self.progress,
            ProgressEvent::ArtifactSkipped {
                role: job.role,
                path: job.destination.clone(),
            },
        );
        ArtifactOutcome::Skipped
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn artifact_label(job: &DownloadJob) -> String {
    job.destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| job.role.to_string())
}

async fn acquire(slots: &Semaphore) -> Result<SemaphorePermit<'_>, LectureError> {
    slots.acquire().await.map_err(|_| LectureError::Cancelled)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn prepare_parent(path: &Path) -> Result<(), LectureError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
