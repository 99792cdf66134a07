// Resolve, fetch and remux recorded lectures.
//
// A `LecturePipeline` walks a course's lectures one at a time: the
// `SourceLocator` renders the lesson page and runs the resolution strategies,
// the `SegmentedFetcher` downloads the chosen feed with a bounded worker pool,
// and the `Remuxer` stream-copies video and audio into the final container.
pub mod attachments;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod locator;
pub mod metadata;
pub mod model;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod remux;
pub mod retry;
pub mod session;
pub mod transcript;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{EngineConfig, HttpConfig, MuxConfig};
pub use error::{ErrorKind, LectureError};
pub use fetcher::{ArtifactOutcome, SegmentedFetcher, StreamArtifacts};
pub use locator::{SourceLocator, Strategy};
pub use model::{
    DownloadJob, LectureMedia, MuxRequest, ResolvedSource, SourceKind, SourceUrl, StreamRole,
};
pub use naming::{CourseLayout, lecture_key, sanitize_component};
pub use pipeline::{
    HttpTransportFactory, LectureFailure, LecturePipeline, LectureState, RunSummary,
    TransportFactory,
};
pub use progress::{ProgressEvent, ProgressSink};
pub use remux::{FfmpegMuxTool, MuxError, MuxTool, Remuxer};
pub use retry::{RetryPolicy, RetryTable};
pub use session::{Cookie, CookieSnapshot, RenderingSession, SessionError};
pub use transport::{AuthenticatedTransport, HttpTransport, install_rustls_provider};

pub use tokio_util::sync::CancellationToken;
