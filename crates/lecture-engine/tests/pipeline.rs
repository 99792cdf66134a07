use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lecture_engine::{
    AuthenticatedTransport, Cookie, CookieSnapshot, EngineConfig, ErrorKind, LectureError,
    LectureMedia, LecturePipeline, MuxError, MuxRequest, MuxTool, RenderingSession, RunSummary,
    SessionError, TransportFactory,
};
use lecture_engine::transport::ChunkCallback;
use lecture_engine::{CancellationToken, ErrorKind::*};
use manifest::ByteSpan;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

const PORTAL: &str = "https://echo.test";

struct FakeSession {
    pages: HashMap<String, String>,
    current: String,
    navigations: usize,
    timeouts_left: u32,
    stale_left: u32,
}

impl FakeSession {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
            current: String::new(),
            navigations: 0,
            timeouts_left: 0,
            stale_left: 0,
        }
    }

    fn with_page(mut self, lesson_id: &str, text: &str) -> Self {
        self.pages
            .insert(format!("{PORTAL}/lesson/{lesson_id}/classroom"), text.to_string());
        self
    }
}

#[async_trait]
impl RenderingSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.navigations += 1;
        self.current = url.to_string();
        Ok(())
    }

    async fn current_page_text(&mut self) -> Result<String, SessionError> {
        if self.stale_left > 0 {
            self.stale_left -= 1;
            return Err(SessionError::Stale);
        }
        Ok(self.pages.get(&self.current).cloned().unwrap_or_default())
    }

    async fn current_title(&mut self) -> Result<String, SessionError> {
        Ok("(ABC101) Course".to_string())
    }

    fn cookies(&self) -> Vec<Cookie> {
        vec![Cookie::new("PLAY_SESSION", "abc")]
    }

    async fn wait_for_element(
        &mut self,
        _selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        if self.timeouts_left > 0 {
            self.timeouts_left -= 1;
            return Err(SessionError::Timeout {
                seconds: timeout.as_secs(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeTransport {
    bodies: HashMap<String, Vec<u8>>,
    requests: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FakeTransport {
    fn body(&self, url: &str) -> Result<Vec<u8>, LectureError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| LectureError::transfer(url, "not found", false))
    }
}

#[async_trait]
impl AuthenticatedTransport for FakeTransport {
    async fn get_text(&self, url: &str) -> Result<String, LectureError> {
        Ok(String::from_utf8_lossy(&self.body(url)?).into_owned())
    }

    async fn get_bytes(&self, url: &str, _range: Option<ByteSpan>) -> Result<Bytes, LectureError> {
        Ok(Bytes::from(self.body(url)?))
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
        let body = self.body(url)?;
        sink.write_all(&body).await?;
        sink.flush().await?;
        on_chunk(body.len() as u64);
        Ok(body.len() as u64)
    }
}

struct SharedTransport {
    transport: Arc<FakeTransport>,
    created: AtomicUsize,
}

impl TransportFactory for SharedTransport {
    fn create(
        &self,
        cookies: &CookieSnapshot,
    ) -> Result<Arc<dyn AuthenticatedTransport>, LectureError> {
        assert_eq!(cookies.header_value().as_deref(), Some("PLAY_SESSION=abc"));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

struct FakeMux {
    available: bool,
    calls: AtomicUsize,
}

impl FakeMux {
    fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MuxTool for FakeMux {
    async fn mux(&self, request: &MuxRequest) -> Result<(), MuxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(MuxError::Unavailable {
                program: "ffmpeg".into(),
            });
        }
        let mut joined = std::fs::read(&request.video)?;
        if let Some(audio) = &request.audio {
            joined.extend(std::fs::read(audio)?);
        }
        std::fs::write(&request.output, joined)?;
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    transport: Arc<FakeTransport>,
    factory: Arc<SharedTransport>,
    mux: Arc<FakeMux>,
    config: EngineConfig,
    token: CancellationToken,
}

impl Harness {
    fn new(transport: FakeTransport, mux_available: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::new(Url::parse(PORTAL).unwrap());
        config.output_root = dir.path().to_path_buf();
        config.pool_size = 2;
        config.retry.backoff.base_delay = Duration::from_millis(1);
        config.retry.backoff.jitter = false;
        let transport = Arc::new(transport);
        Self {
            dir,
            factory: Arc::new(SharedTransport {
                transport: transport.clone(),
                created: AtomicUsize::new(0),
            }),
            transport,
            mux: FakeMux::new(mux_available),
            config,
            token: CancellationToken::new(),
        }
    }

    async fn run(&self, lectures: &[LectureMedia], session: &mut FakeSession) -> RunSummary {
        let pipeline = LecturePipeline::new(
            self.config.clone(),
            "Course",
            self.factory.clone(),
            self.mux.clone(),
            self.token.clone(),
            None,
        );
        pipeline.run(lectures, session).await
    }

    fn dirty(&self, name: &str) -> PathBuf {
        self.dir.path().join("Course").join("dirty").join(name)
    }

    fn requests(&self) -> usize {
        self.transport.requests.load(Ordering::SeqCst)
    }

    fn mux_calls(&self) -> usize {
        self.mux.calls.load(Ordering::SeqCst)
    }
}

fn lesson(id: &str, title: &str, video: Value) -> LectureMedia {
    let mut item = json!({
        "lesson": {
            "lesson": { "id": id, "name": title },
            "startTimeUTC": "2024-03-07T09:00:00.000Z"
        }
    });
    if let (Some(lesson), Some(extra)) = (item["lesson"].as_object_mut(), video.as_object()) {
        lesson.extend(extra.clone());
    }
    LectureMedia::from_syllabus_item(item, None).unwrap()
}

fn manifest_lesson(id: &str, title: &str) -> LectureMedia {
    lesson(
        id,
        title,
        json!({
            "hasVideo": true,
            "hasAvailableVideo": true,
            "video": { "media": { "media": { "versions": [{ "manifests": [
                { "uri": format!("https://offload.aws.test/{id}/s1_av.m3u8?X-Sig=1") }
            ]}]}}}
        }),
    )
}

fn direct_lesson(id: &str, title: &str) -> LectureMedia {
    lesson(
        id,
        title,
        json!({
            "video": { "media": { "media": { "current": { "primaryFiles": [
                { "s3Url": format!("https://s3.test/{id}/sd.mp4") },
                { "s3Url": format!("https://s3.test/{id}/hd.mp4") }
            ]}}}}
        }),
    )
}

fn serve_manifest(transport: &mut FakeTransport, id: &str) {
    let base = format!("https://content.echo.test/{id}");
    transport.bodies.insert(
        format!("{base}/s1_av.m3u8"),
        b"#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,\nseg1.ts\n#EXT-X-ENDLIST\n"
            .to_vec(),
    );
    transport
        .bodies
        .insert(format!("{base}/seg0.ts"), b"AAAA".to_vec());
    transport
        .bodies
        .insert(format!("{base}/seg1.ts"), b"BBBB".to_vec());
}

fn serve_direct(transport: &mut FakeTransport, id: &str) {
    transport
        .bodies
        .insert(format!("https://s3.test/{id}/hd.mp4"), b"HD-FILE".to_vec());
}

fn exists(path: &Path) -> bool {
    path.exists()
}

#[tokio::test]
async fn second_run_does_no_transfer_and_no_mux() {
    let mut transport = FakeTransport::default();
    serve_manifest(&mut transport, "L1");
    serve_direct(&mut transport, "L2");
    let harness = Harness::new(transport, true);
    let lectures = [manifest_lesson("L1", "Intro"), direct_lesson("L2", "Ownership")];

    let mut session = FakeSession::new();
    let first = harness.run(&lectures, &mut session).await;
    assert_eq!(first.processed, 2, "{first:?}");
    assert!(first.skipped.is_empty());

    let muxed = harness.dirty("2024-03-07_Intro.mp4");
    assert_eq!(std::fs::read(&muxed).unwrap(), b"AAAABBBB");
    assert!(!exists(&harness.dirty("2024-03-07_Intro_video.ts")));
    assert_eq!(
        std::fs::read(harness.dirty("2024-03-07_Ownership.mp4")).unwrap(),
        b"HD-FILE"
    );

    let requests = harness.requests();
    let mux_calls = harness.mux_calls();
    assert_eq!(mux_calls, 1);

    let mut session = FakeSession::new();
    let second = harness.run(&lectures, &mut session).await;

    assert_eq!(second.processed, 2);
    assert_eq!(second.up_to_date, 2);
    assert_eq!(harness.requests(), requests);
    assert_eq!(harness.mux_calls(), mux_calls);
    assert_eq!(session.navigations, 0);
    assert_eq!(std::fs::read(&muxed).unwrap(), b"AAAABBBB");
}

#[tokio::test]
async fn second_run_with_alternative_feeds_and_a_single_feed_does_nothing() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L2");
    let mut harness = Harness::new(transport, true);
    harness.config.alternative_feeds = true;
    let lectures = [direct_lesson("L2", "Ownership")];

    let first = harness.run(&lectures, &mut FakeSession::new()).await;
    assert_eq!(first.processed, 1, "{first:?}");
    assert_eq!(
        std::fs::read(harness.dirty("2024-03-07_Ownership1.mp4")).unwrap(),
        b"HD-FILE"
    );
    assert!(!exists(&harness.dirty("2024-03-07_Ownership2.mp4")));

    let requests = harness.requests();
    let created = harness.factory.created.load(Ordering::SeqCst);
    let mut session = FakeSession::new();
    let second = harness.run(&lectures, &mut session).await;

    assert_eq!(second.up_to_date, 1);
    assert_eq!(session.navigations, 0);
    assert_eq!(harness.requests(), requests);
    assert_eq!(harness.factory.created.load(Ordering::SeqCst), created);
}

#[tokio::test]
async fn lecture_without_captions_is_not_revisited() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L1");
    transport.bodies.insert(
        format!("{PORTAL}/api/ui/echoplayer/lessons/L1/medias/M1/transcript-file?format=vtt"),
        Vec::new(),
    );
    let mut harness = Harness::new(transport, true);
    harness.config.download_transcripts = true;
    let lecture = lesson(
        "L1",
        "Quiet",
        json!({
            "medias": [{ "id": "M1", "mediaType": "Video" }],
            "video": { "media": { "media": { "current": { "primaryFiles": [
                { "s3Url": "https://s3.test/L1/hd.mp4" }
            ]}}}}
        }),
    );

    let first = harness.run(std::slice::from_ref(&lecture), &mut FakeSession::new()).await;
    assert_eq!(first.processed, 1, "{first:?}");
    let clean = harness
        .dir
        .path()
        .join("Course")
        .join("clean")
        .join("2024-03-07_Quiet.txt");
    assert_eq!(std::fs::read_to_string(&clean).unwrap(), "");

    let requests = harness.requests();
    let mut session = FakeSession::new();
    let second = harness.run(&[lecture], &mut session).await;

    assert_eq!(second.up_to_date, 1);
    assert_eq!(session.navigations, 0);
    assert_eq!(harness.requests(), requests);
}

fn page_scan_setup() -> (FakeTransport, LectureMedia, FakeSession) {
    let mut transport = FakeTransport::default();
    transport
        .bodies
        .insert("https://s3.test/p/a.sd1.mp4".into(), b"SD".to_vec());
    transport
        .bodies
        .insert("https://s3.test/p/a.hd1.mp4".into(), b"HD".to_vec());
    let lecture = lesson("P1", "Scanned", json!({}));
    let session = FakeSession::new().with_page(
        "P1",
        r#"<video src="https://s3.test/p/a.hd1.mp4"></video>{"alt":"https:\/\/s3.test\/p\/a.sd1.mp4"}"#,
    );
    (transport, lecture, session)
}

#[tokio::test]
async fn alternative_feeds_off_yields_one_output() {
    let (transport, lecture, mut session) = page_scan_setup();
    let harness = Harness::new(transport, true);

    let summary = harness.run(&[lecture], &mut session).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(std::fs::read(harness.dirty("2024-03-07_Scanned.mp4")).unwrap(), b"SD");
    assert!(!exists(&harness.dirty("2024-03-07_Scanned1.mp4")));
    assert!(!exists(&harness.dirty("2024-03-07_Scanned2.mp4")));
    assert_eq!(harness.requests(), 1);
}

#[tokio::test]
async fn alternative_feeds_on_yields_numbered_outputs() {
    let (transport, lecture, mut session) = page_scan_setup();
    let mut harness = Harness::new(transport, true);
    harness.config.alternative_feeds = true;

    let summary = harness.run(&[lecture], &mut session).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(std::fs::read(harness.dirty("2024-03-07_Scanned1.mp4")).unwrap(), b"SD");
    assert_eq!(std::fs::read(harness.dirty("2024-03-07_Scanned2.mp4")).unwrap(), b"HD");
    assert!(!exists(&harness.dirty("2024-03-07_Scanned.mp4")));
}

#[tokio::test]
async fn unavailable_mux_keeps_raw_artifacts() {
    let mut transport = FakeTransport::default();
    serve_manifest(&mut transport, "L1");
    let harness = Harness::new(transport, false);

    let summary = harness
        .run(&[manifest_lesson("L1", "Intro")], &mut FakeSession::new())
        .await;

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].kind, MuxUnavailable);
    assert_eq!(
        std::fs::read(harness.dirty("2024-03-07_Intro_video.ts")).unwrap(),
        b"AAAABBBB"
    );
    assert!(!exists(&harness.dirty("2024-03-07_Intro.mp4")));

    // A rerun reuses the artifact instead of fetching it again.
    let requests = harness.requests();
    harness
        .run(&[manifest_lesson("L1", "Intro")], &mut FakeSession::new())
        .await;
    assert_eq!(harness.requests(), requests + 1, "only the manifest is re-read");
}

#[tokio::test]
async fn skip_on_error_continues_with_next_lecture() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L2");
    let harness = Harness::new(transport, true);
    let lectures = [lesson("L1", "Empty", json!({})), direct_lesson("L2", "Ownership")];

    let summary = harness.run(&lectures, &mut FakeSession::new()).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].lecture, "L1");
    assert_eq!(summary.skipped[0].kind, ResolutionExhausted);
    assert!(!summary.aborted());
}

#[tokio::test]
async fn disabled_skip_on_error_aborts_run() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L2");
    let mut harness = Harness::new(transport, true);
    harness.config.skip_on_error = false;
    let lectures = [lesson("L1", "Empty", json!({})), direct_lesson("L2", "Ownership")];
    let mut session = FakeSession::new();

    let summary = harness.run(&lectures, &mut session).await;

    assert!(summary.aborted());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(session.navigations, 1);
    assert!(!exists(&harness.dirty("2024-03-07_Ownership.mp4")));
}

#[tokio::test]
async fn direct_file_is_preferred_over_manifest() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L1");
    serve_manifest(&mut transport, "L1");
    let harness = Harness::new(transport, true);
    let mut lecture = direct_lesson("L1", "Both");
    let manifests = manifest_lesson("L1", "Both");
    let mut merged = (*lecture.metadata).clone();
    merged["lesson"]["hasVideo"] = json!(true);
    merged["lesson"]["hasAvailableVideo"] = json!(true);
    merged["lesson"]["video"]["media"]["media"]["versions"] =
        manifests.metadata["lesson"]["video"]["media"]["media"]["versions"].clone();
    lecture.metadata = Arc::new(merged);

    let summary = harness.run(&[lecture], &mut FakeSession::new()).await;

    assert_eq!(summary.processed, 1);
    assert_eq!(harness.mux_calls(), 0);
    assert_eq!(
        *harness.transport.seen.lock(),
        vec!["https://s3.test/L1/hd.mp4".to_string()]
    );
}

#[tokio::test]
async fn render_timeouts_are_retried_up_to_bound() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L1");
    let mut harness = Harness::new(transport, true);
    harness.config.player_selector = Some("player".into());

    let mut session = FakeSession::new();
    session.timeouts_left = 2;
    let summary = harness.run(&[direct_lesson("L1", "Slow")], &mut session).await;
    assert_eq!(summary.processed, 1);
    assert_eq!(session.navigations, 3);

    harness.config.retry.set_max_attempts(ErrorKind::RenderTimeout, 2);
    let mut session = FakeSession::new();
    session.timeouts_left = 5;
    let summary = harness.run(&[direct_lesson("L9", "Slower")], &mut session).await;
    assert_eq!(summary.skipped[0].kind, RenderTimeout);
    assert_eq!(session.navigations, 2);
}

#[tokio::test]
async fn cancelled_run_touches_nothing() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L1");
    let harness = Harness::new(transport, true);
    harness.token.cancel();
    let mut session = FakeSession::new();

    let summary = harness.run(&[direct_lesson("L1", "Intro")], &mut session).await;

    assert!(summary.cancelled);
    assert_eq!(summary.processed, 0);
    assert_eq!(session.navigations, 0);
    assert_eq!(harness.factory.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn multi_part_lecture_fans_out_under_group_prefix() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "P1");
    serve_direct(&mut transport, "P2");
    let harness = Harness::new(transport, true);
    let part = |id: &str, name: &str| {
        json!({ "lesson": {
            "lesson": { "id": id, "name": name },
            "startTimeUTC": "2024-04-01T09:00:00Z",
            "video": { "media": { "media": { "current": { "primaryFiles": [
                { "s3Url": format!("https://s3.test/{id}/hd.mp4") }
            ]}}}}
        }})
    };
    let group = json!({
        "groupInfo": { "name": "Week 1", "createdAt": "2024-04-01T00:00:00Z" },
        "lessons": [part("P1", "Part A"), part("P2", "Part B")]
    });
    let lecture = LectureMedia::from_syllabus_item(group, Some(PathBuf::from("Unit 1"))).unwrap();

    let summary = harness.run(&[lecture], &mut FakeSession::new()).await;

    assert_eq!(summary.processed, 2);
    let dir = harness.dir.path().join("Course").join("dirty").join("Unit 1");
    assert!(dir.join("2024-04-01_Week 1 - Part A.mp4").exists());
    assert!(dir.join("2024-04-01_Week 1 - Part B.mp4").exists());
}

#[tokio::test]
async fn render_timeouts_and_stale_reads_have_separate_bounds() {
    let mut transport = FakeTransport::default();
    serve_direct(&mut transport, "L1");
    serve_direct(&mut transport, "L2");
    let mut harness = Harness::new(transport, true);
    harness.config.player_selector = Some("player".into());

    // Four of each stays below both bounds of five.
    let mut session = FakeSession::new();
    session.timeouts_left = 4;
    session.stale_left = 4;
    let summary = harness.run(&[direct_lesson("L1", "Flaky")], &mut session).await;
    assert_eq!(summary.processed, 1, "{summary:?}");
    assert_eq!(session.navigations, 9);

    harness.config.retry.set_max_attempts(ErrorKind::StaleContent, 3);
    let mut session = FakeSession::new();
    session.stale_left = 10;
    let summary = harness.run(&[direct_lesson("L2", "Shifting")], &mut session).await;
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped[0].kind, StaleContent);
    assert_eq!(session.navigations, 3);
    assert!(!exists(&harness.dirty("2024-03-07_Shifting.mp4")));
}
