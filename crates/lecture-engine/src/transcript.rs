// WebVTT transcripts: download the raw captions next to the lecture's
// artifacts and write a readable plain-text copy under `clean/`.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::error::LectureError;
use crate::transport::AuthenticatedTransport;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
/// A filler word together with the commas that set it off.
static FILLER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i),?\s*\b(?:um|uh|er)\b,?").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A paragraph is closed once it holds this many caption lines.
const MAX_PARAGRAPH_LINES: usize = 6;

fn clean_line(line: &str) -> String {
    let line = TAG_RE.replace_all(line, "");
    let line = FILLER_RE.replace_all(&line, "");
    SPACE_RE.replace_all(&line, " ").trim().to_string()
}

fn is_cue_number(line: &str) -> bool {
    let digits = line.replace('.', "");
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Converts WebVTT captions to paragraphs of plain text.
///
/// The header block, cue numbers, timing lines and `NOTE` blocks are dropped.
/// Tags such as `<v Speaker 0>` and filler words are stripped. A paragraph ends
/// after a line ending in a full stop or after six lines.
pub fn vtt_to_text(vtt: &str) -> String {
    let mut lines = vtt.lines().map(str::trim);
    // Header runs until the first blank line.
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
    }

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut in_note = false;

    for line in lines {
        if line.is_empty() {
            in_note = false;
            continue;
        }
        if in_note {
            continue;
        }
        if line.starts_with("NOTE") {
            in_note = true;
            continue;
        }
        if line.contains("-->") || is_cue_number(line) {
            continue;
        }

        let cleaned = clean_line(line);
        if cleaned.is_empty() {
            continue;
        }
        if let Some(last) = current.last()
            && (last.ends_with('.') || current.len() >= MAX_PARAGRAPH_LINES)
        {
            paragraphs.push(current.join(" "));
            current.clear();
        }
        current.push(cleaned);
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs.join("\n")
}

/// Transcript URL for a lesson's video media.
pub fn transcript_url(portal_base: &str, lesson_id: &str, media_id: &str) -> String {
    format!(
        "{portal_base}/api/ui/echoplayer/lessons/{lesson_id}/medias/{media_id}/transcript-file?format=vtt"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Written { clean: PathBuf },
    AlreadyPresent,
    /// The portal returned no captions; an empty clean file was written.
    Empty,
}

/// Fetches the VTT at `url`, saves it to `raw` and its cleaned text to `clean`.
pub async fn fetch_transcript(
    transport: &dyn AuthenticatedTransport,
    url: &str,
    raw: PathBuf,
    clean: PathBuf,
) -> Result<TranscriptOutcome, LectureError> {
    if tokio::fs::try_exists(&clean).await.unwrap_or(false) {
        debug!(path = %clean.display(), "Transcript exists, skipping");
        return Ok(TranscriptOutcome::AlreadyPresent);
    }

    let vtt = transport.get_text(url).await?;
    for path in [&raw, &clean] {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    // An empty clean file marks the lecture as having no captions.
    if vtt.trim().is_empty() {
        tokio::fs::write(&clean, "").await?;
        return Ok(TranscriptOutcome::Empty);
    }

    tokio::fs::write(&raw, &vtt).await?;
    tokio::fs::write(&clean, vtt_to_text(&vtt)).await?;

    info!(path = %clean.display(), "Transcript saved");
    Ok(TranscriptOutcome::Written { clean })
}
