//! Lossless remux of fetched artifacts into the final container.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use process_utils::{detect_version, stderr_tail, tokio_command};
use tracing::{debug, info, warn};

use crate::config::MuxConfig;
use crate::model::MuxRequest;
use crate::naming::remove_if_present;
use crate::progress::{ProgressEvent, ProgressSink, emit};

/// Lines of tool stderr kept in [`MuxError::Failed`].
const STDERR_TAIL_LINES: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("mux program `{program}` could not be started")]
    Unavailable { program: String },

    #[error("mux program exited with status {status:?}: {stderr_tail}")]
    Failed {
        status: Option<i32>,
        stderr_tail: String,
    },

    #[error("mux output could not be moved into place: {0}")]
    Io(#[from] std::io::Error),
}

/// An external program that combines a video and an optional audio artifact.
#[async_trait]
pub trait MuxTool: Send + Sync {
    async fn mux(&self, request: &MuxRequest) -> Result<(), MuxError>;
}

/// Runs ffmpeg with stream-copied video and the configured audio codec.
#[derive(Debug, Clone)]
pub struct FfmpegMuxTool {
    program: String,
    audio_codec: String,
}

impl FfmpegMuxTool {
    pub fn new(config: &MuxConfig) -> Self {
        Self {
            program: config.program.clone(),
            audio_codec: config.audio_codec.clone(),
        }
    }

    /// First line of `<program> -version`, or `None` when it cannot run.
    pub async fn version(&self) -> Option<String> {
        detect_version(&self.program).await
    }

    pub fn build_args(&self, request: &MuxRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(request.video.clone().into_os_string());

        if let Some(audio) = &request.audio {
            args.push("-i".into());
            args.push(audio.clone().into_os_string());
            args.extend(["-map", "0:v:0", "-map", "1:a:0"].map(OsString::from));
        }

        args.extend(["-c:v", "copy", "-c:a"].map(OsString::from));
        args.push(OsString::from(&self.audio_codec));
        args.push(request.output.clone().into_os_string());
        args
    }
}

#[async_trait]
impl MuxTool for FfmpegMuxTool {
    async fn mux(&self, request: &MuxRequest) -> Result<(), MuxError> {
        let args = self.build_args(request);
        debug!(program = %self.program, ?args, "Running mux tool");

        let output = match tokio_command(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                debug!(program = %self.program, error = %e, "Failed to spawn mux tool");
                return Err(MuxError::Unavailable {
                    program: self.program.clone(),
                });
            }
        };

        if !output.status.success() {
            return Err(MuxError::Failed {
                status: output.status.code(),
                stderr_tail: stderr_tail(&output.stderr, STDERR_TAIL_LINES),
            });
        }
        Ok(())
    }
}

/// Drives a [`MuxTool`] and manages the files around it.
///
/// The tool writes to a temporary sibling of the output. Only when it succeeds
/// is a stale output replaced and are the raw artifacts deleted; on any failure
/// the artifacts stay where they are and no output appears.
pub struct Remuxer {
    tool: Arc<dyn MuxTool>,
    progress: Option<ProgressSink>,
}

impl Remuxer {
    pub fn new(tool: Arc<dyn MuxTool>, progress: Option<ProgressSink>) -> Self {
        Self { tool, progress }
    }

    pub async fn remux(&self, request: &MuxRequest) -> Result<(), MuxError> {
        emit(
            &self.progress,
            ProgressEvent::Remuxing {
                output: request.output.clone(),
            },
        );

        let staging = staging_path(&request.output);
        let staged = MuxRequest {
            video: request.video.clone(),
            audio: request.audio.clone(),
            output: staging.clone(),
        };

        if let Err(e) = self.tool.mux(&staged).await {
            remove_if_present(&staging).await;
            match &e {
                MuxError::Unavailable { program } => warn!(
                    program = %program,
                    output = %request.output.display(),
                    "Mux tool unavailable, leaving raw artifacts in place"
                ),
                _ => warn!(
                    output = %request.output.display(),
                    error = %e,
                    "Mux failed, leaving raw artifacts in place"
                ),
            }
            return Err(e);
        }

        if tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
            debug!(output = %request.output.display(), "Removing stale output");
            tokio::fs::remove_file(&request.output).await?;
        }
        tokio::fs::rename(&staging, &request.output).await?;

        remove_if_present(&request.video).await;
        if let Some(audio) = &request.audio {
            remove_if_present(audio).await;
        }

        info!(output = %request.output.display(), "Remuxed");
        Ok(())
    }
}

/// `<stem>.part.<ext>`, keeping the extension the tool infers the format from.
fn staging_path(output: &Path) -> PathBuf {
    let ext = output
        .extension()
        .map(|e| format!("part.{}", e.to_string_lossy()))
        .unwrap_or_else(|| "part".to_string());
    output.with_extension(ext)
}
