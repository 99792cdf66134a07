//! Stream resolution.
//!
//! Four strategies are tried in fixed priority over the lecture metadata and
//! the rendered lesson page. Each is a pure function with the same contract:
//! it returns candidate URLs best-first, or [`NotFound`] to fall through to the
//! next one. The first success wins; running out of strategies is
//! [`LectureError::ResolutionExhausted`] for that lecture only.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use manifest::{COMBINED_SUFFIX, rank_order};
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::{ErrorKind, LectureError};
use crate::metadata;
use crate::model::{LectureMedia, ResolvedSource};
use crate::session::{RenderingSession, SessionError};

static PAGE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https://[^,"\s]*?\.mp4"#).unwrap());

static PAGE_MANIFEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https://[^,"\s]*?\.m3u8"#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectFile,
    EmbeddedManifest,
    PageScanFile,
    PageScanManifest,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DirectFile => "direct-file",
            Self::EmbeddedManifest => "embedded-manifest",
            Self::PageScanFile => "page-scan-file",
            Self::PageScanManifest => "page-scan-manifest",
        })
    }
}

/// A strategy found no usable candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{strategy} strategy found nothing: {reason}")]
pub struct NotFound {
    pub strategy: Strategy,
    pub reason: &'static str,
}

impl NotFound {
    fn new(strategy: Strategy, reason: &'static str) -> Self {
        Self { strategy, reason }
    }
}

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInput<'a> {
    pub metadata: &'a Value,
    pub page_text: &'a str,
    /// Host offloaded manifest URIs are rewritten to.
    pub streaming_host: &'a str,
}

pub type StrategyFn = fn(&StrategyInput<'_>) -> Result<Vec<String>, NotFound>;

/// Strategies in priority order.
pub const STRATEGIES: [(Strategy, StrategyFn); 4] = [
    (Strategy::DirectFile, direct_file),
    (Strategy::EmbeddedManifest, embedded_manifest),
    (Strategy::PageScanFile, page_scan_file),
    (Strategy::PageScanManifest, page_scan_manifest),
];

/// Highest-ranked progressive file from the metadata. Always exactly one URL.
pub fn direct_file(input: &StrategyInput<'_>) -> Result<Vec<String>, NotFound> {
    let candidates = metadata::primary_files(input.metadata);
    let best = rank_order(candidates)
        .into_iter()
        .next()
        .ok_or(NotFound::new(Strategy::DirectFile, "no primary files in metadata"))?;
    Ok(vec![best])
}

/// Manifest URIs from the metadata, rewritten onto the streaming host, the
/// last declared first.
pub fn embedded_manifest(input: &StrategyInput<'_>) -> Result<Vec<String>, NotFound> {
    let uris = metadata::manifest_uris(input.metadata);
    if uris.is_empty() {
        return Err(NotFound::new(
            Strategy::EmbeddedManifest,
            "no manifests, or lesson has no available video",
        ));
    }

    let rewritten: Vec<String> = uris
        .iter()
        .rev()
        .filter_map(|uri| rewrite_host(uri, input.streaming_host))
        .collect();

    let combined: Vec<String> = rewritten
        .iter()
        .filter(|u| u.ends_with(COMBINED_SUFFIX))
        .cloned()
        .collect();
    let chosen = if combined.is_empty() { rewritten } else { combined };

    if chosen.is_empty() {
        return Err(NotFound::new(
            Strategy::EmbeddedManifest,
            "no manifest URI could be parsed",
        ));
    }
    Ok(chosen)
}

/// Literal progressive-file URLs in the page, descending, top two.
pub fn page_scan_file(input: &StrategyInput<'_>) -> Result<Vec<String>, NotFound> {
    let found: Vec<String> = scan_page(&PAGE_FILE_RE, input.page_text)
        .into_iter()
        .rev()
        .take(2)
        .collect();
    if found.is_empty() {
        return Err(NotFound::new(Strategy::PageScanFile, "no file URLs in page"));
    }
    Ok(found)
}

/// Combined audio+video manifest URIs in the page, reversed, top two.
pub fn page_scan_manifest(input: &StrategyInput<'_>) -> Result<Vec<String>, NotFound> {
    let found = scan_page(&PAGE_MANIFEST_RE, input.page_text);
    if found.is_empty() {
        return Err(NotFound::new(
            Strategy::PageScanManifest,
            "no manifest URLs in page",
        ));
    }

    let combined: Vec<String> = found
        .into_iter()
        .filter(|u| u.ends_with(COMBINED_SUFFIX))
        .rev()
        .take(2)
        .collect();
    if combined.is_empty() {
        return Err(NotFound::new(
            Strategy::PageScanManifest,
            "no combined audio+video manifest in page",
        ));
    }
    Ok(combined)
}

/// Unescapes `\/`, then returns the de-duplicated matches in ascending order.
fn scan_page(re: &Regex, page_text: &str) -> BTreeSet<String> {
    let text = page_text.replace("\\/", "/");
    re.find_iter(&text).map(|m| m.as_str().to_string()).collect()
}

fn rewrite_host(uri: &str, host: &str) -> Option<String> {
    match Url::parse(uri) {
        Ok(parsed) => Some(format!("{}://{}{}", parsed.scheme(), host, parsed.path())),
        Err(e) => {
            debug!(uri = %uri, error = %e, "Skipping unparsable manifest URI");
            None
        }
    }
}

/// Runs the strategies in order and keeps one or two candidates.
pub fn locate(
    input: &StrategyInput<'_>,
    alternative_feeds: bool,
) -> Result<(Strategy, ResolvedSource), Vec<NotFound>> {
    let mut misses = Vec::with_capacity(STRATEGIES.len());
    for (strategy, run) in STRATEGIES {
        match run(input) {
            Ok(candidates) => {
                if let Some(source) = ResolvedSource::from_candidates(candidates, alternative_feeds)
                {
                    return Ok((strategy, source));
                }
                misses.push(NotFound::new(strategy, "strategy returned no candidates"));
            }
            Err(miss) => {
                debug!(strategy = %strategy, reason = miss.reason, "Strategy fell through");
                misses.push(miss);
            }
        }
    }
    Err(misses)
}

/// Renders the lesson page and resolves the lecture's stream location.
pub struct SourceLocator<'a> {
    config: &'a EngineConfig,
    token: CancellationToken,
}

impl<'a> SourceLocator<'a> {
    pub fn new(config: &'a EngineConfig, token: CancellationToken) -> Self {
        Self { config, token }
    }

    pub async fn resolve(
        &self,
        media: &LectureMedia,
        session: &mut dyn RenderingSession,
    ) -> Result<(Strategy, ResolvedSource), LectureError> {
        let page_url = self.config.lesson_page_url(&media.id);
        let page_text = self.read_page(session, &page_url).await?;
        let streaming_host = self.config.streaming_host()?;

        let input = StrategyInput {
            metadata: &media.metadata,
            page_text: &page_text,
            streaming_host: &streaming_host,
        };

        match locate(&input, self.config.alternative_feeds) {
            Ok((strategy, source)) => {
                info!(
                    lecture = %media.id,
                    strategy = %strategy,
                    feeds = source.feeds().len(),
                    url = %source.primary().url,
                    "Resolved stream"
                );
                Ok((strategy, source))
            }
            Err(misses) => {
                for miss in &misses {
                    debug!(lecture = %media.id, "{miss}");
                }
                Err(LectureError::ResolutionExhausted {
                    lecture: media.id.clone(),
                })
            }
        }
    }

    /// Navigates to `url` and reads the page text.
    ///
    /// Render timeouts and stale reads are counted separately, each bounded by
    /// its own entry in the retry table.
    pub async fn read_page(
        &self,
        session: &mut dyn RenderingSession,
        url: &str,
    ) -> Result<String, LectureError> {
        let max_timeouts = self.config.retry.max_attempts(ErrorKind::RenderTimeout);
        let max_stale = self.config.retry.max_attempts(ErrorKind::StaleContent);
        let mut timeouts = 0u32;
        let mut stale = 0u32;

        loop {
            if self.token.is_cancelled() {
                return Err(LectureError::Cancelled);
            }

            match self.try_read(session, url).await {
                Ok(text) => return Ok(text),
                Err(SessionError::Timeout { seconds }) => {
                    timeouts += 1;
                    if timeouts >= max_timeouts {
                        return Err(LectureError::RenderTimeout {
                            seconds,
                            attempts: timeouts,
                        });
                    }
                    warn!(url = %url, attempt = timeouts, max = max_timeouts, "Page render timed out, reloading");
                }
                Err(SessionError::Stale) => {
                    stale += 1;
                    if stale >= max_stale {
                        return Err(LectureError::StaleContent { attempts: stale });
                    }
                    warn!(url = %url, attempt = stale, max = max_stale, "Page changed while reading, reloading");
                }
                Err(SessionError::Other(reason)) => return Err(LectureError::Session { reason }),
            }
        }
    }

    async fn try_read(
        &self,
        session: &mut dyn RenderingSession,
        url: &str,
    ) -> Result<String, SessionError> {
        session.navigate(url).await?;
        if let Some(selector) = &self.config.player_selector {
            session
                .wait_for_element(selector, self.config.render_timeout)
                .await?;
        }
        session.current_page_text().await
    }
}
