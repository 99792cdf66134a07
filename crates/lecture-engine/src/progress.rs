use std::path::PathBuf;
use std::sync::Arc;

use crate::model::StreamRole;

/// Progress notifications emitted by the fetcher and the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    LectureStarted {
        id: String,
        title: String,
        index: usize,
        total: usize,
    },
    ArtifactStarted {
        role: StreamRole,
        path: PathBuf,
        total_bytes: Option<u64>,
        total_segments: Option<usize>,
    },
    /// Bytes written since the previous event for this role.
    BytesWritten { role: StreamRole, bytes: u64 },
    SegmentCompleted {
        role: StreamRole,
        completed: usize,
        total: usize,
    },
    ArtifactFinished { role: StreamRole, path: PathBuf },
    ArtifactSkipped { role: StreamRole, path: PathBuf },
    Remuxing { output: PathBuf },
    LectureFinished { id: String, outcome: String },
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync + 'static>;

pub(crate) fn emit(sink: &Option<ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = sink {
        sink(event);
    }
}
