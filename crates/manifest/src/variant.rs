//! Top-level manifest interpretation.
//!
//! A lecture manifest lists one or more renditions. This module classifies
//! each listed URI as video, audio or combined and chooses the pair the
//! fetcher should download. Three dialects are understood:
//!
//! - explicit `#ENTRY role=<video|audio|combined>` tags followed by a URI line
//! - HLS master playlists (`#EXT-X-STREAM-INF` and `#EXT-X-MEDIA:TYPE=AUDIO`)
//! - bare URI lines whose file name carries a role suffix (`_av`, `_v`, `_a`)

use std::fmt;

use tracing::debug;
use url::Url;

use crate::error::ManifestError;
use crate::rank::{Candidate, rank_order};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantRole {
    Video,
    Audio,
    Combined,
}

impl VariantRole {
    fn from_attr(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "video" | "v" => Some(Self::Video),
            "audio" | "a" => Some(Self::Audio),
            "combined" | "av" | "muxed" => Some(Self::Combined),
            _ => None,
        }
    }

    /// Guesses a role from the file name of a bare URI line.
    fn from_file_name(uri: &str) -> Option<Self> {
        let path = uri.split(['?', '#']).next().unwrap_or(uri);
        let name = path.rsplit('/').next().unwrap_or(path).to_ascii_lowercase();
        let stem = name.rsplit_once('.').map_or(name.as_str(), |(stem, _)| stem);

        if stem.ends_with("av") {
            Some(Self::Combined)
        } else if stem.ends_with("_v") {
            Some(Self::Video)
        } else if stem.ends_with("_a") {
            Some(Self::Audio)
        } else {
            None
        }
    }

    pub fn carries_video(self) -> bool {
        matches!(self, Self::Video | Self::Combined)
    }
}

impl fmt::Display for VariantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Combined => "combined",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantEntry {
    pub uri: String,
    pub role: VariantRole,
    /// Declared quality signal (`BANDWIDTH` or `bandwidth=`), if any.
    pub bandwidth: Option<u64>,
    /// Audio rendition group (`AUDIO` on a stream-inf, `GROUP-ID` on a media tag).
    pub group: Option<String>,
}

/// The video URI to download plus the separate audio URI, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPair {
    pub video: String,
    pub audio: Option<String>,
    /// The video URI already carries the audio track.
    pub combined: bool,
}

/// Ordered variant entries of one manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDocument {
    entries: Vec<VariantEntry>,
    has_segments: bool,
}

// Tag seen, URI line still expected.
struct PendingTag {
    tag: &'static str,
    role: Option<VariantRole>,
    bandwidth: Option<u64>,
    group: Option<String>,
}

impl ManifestDocument {
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Result<Self, ManifestError> {
        let mut entries = Vec::new();
        let mut pending: Option<PendingTag> = None;
        let mut has_segments = false;
        let mut segment_uri_expected = false;
        let mut has_separate_audio = false;
        let mut stream_infs = Vec::new();

        for raw in lines {
            let line = raw.as_ref().trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix("#ENTRY") {
                if let Some(p) = pending.take() {
                    return Err(ManifestError::DanglingTag { tag: p.tag.into() });
                }
                let attrs = split_attributes(rest, |c| c == ',' || c.is_whitespace());
                let role_value = attr(&attrs, "ROLE").ok_or_else(|| {
                    ManifestError::invalid_playlist("#ENTRY without a role attribute")
                })?;
                let role = VariantRole::from_attr(role_value).ok_or_else(|| {
                    ManifestError::invalid_playlist(format!("unknown entry role `{role_value}`"))
                })?;
                pending = Some(PendingTag {
                    tag: "#ENTRY",
                    role: Some(role),
                    bandwidth: attr(&attrs, "BANDWIDTH").and_then(|v| v.parse().ok()),
                    group: None,
                });
            } else if let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") {
                if let Some(p) = pending.take() {
                    return Err(ManifestError::DanglingTag { tag: p.tag.into() });
                }
                let attrs = split_attributes(rest, |c| c == ',');
                pending = Some(PendingTag {
                    tag: "#EXT-X-STREAM-INF",
                    role: None,
                    bandwidth: attr(&attrs, "BANDWIDTH").and_then(|v| v.parse().ok()),
                    group: attr(&attrs, "AUDIO").map(str::to_string),
                });
            } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA:") {
                let attrs = split_attributes(rest, |c| c == ',');
                let is_audio = attr(&attrs, "TYPE").is_some_and(|t| t.eq_ignore_ascii_case("AUDIO"));
                if let (true, Some(uri)) = (is_audio, attr(&attrs, "URI")) {
                    has_separate_audio = true;
                    entries.push(VariantEntry {
                        uri: uri.to_string(),
                        role: VariantRole::Audio,
                        bandwidth: None,
                        group: attr(&attrs, "GROUP-ID").map(str::to_string),
                    });
                }
            } else if line.starts_with("#EXTINF") {
                has_segments = true;
                segment_uri_expected = true;
            } else if line.starts_with('#') {
                continue;
            } else if let Some(p) = pending.take() {
                if p.role.is_none() {
                    stream_infs.push(entries.len());
                }
                entries.push(VariantEntry {
                    uri: line.to_string(),
                    role: p.role.unwrap_or(VariantRole::Video),
                    bandwidth: p.bandwidth,
                    group: p.group,
                });
            } else if std::mem::take(&mut segment_uri_expected) {
                continue;
            } else if let Some(role) = VariantRole::from_file_name(line) {
                if role == VariantRole::Audio {
                    has_separate_audio = true;
                }
                entries.push(VariantEntry {
                    uri: line.to_string(),
                    role,
                    bandwidth: None,
                    group: None,
                });
            } else {
                debug!(uri = %line, "Ignoring manifest line without a recognisable role");
            }
        }

        if let Some(p) = pending {
            return Err(ManifestError::DanglingTag { tag: p.tag.into() });
        }

        // Without a separate audio rendition, stream-inf variants carry their
        // own audio track.
        if !has_separate_audio {
            for idx in stream_infs {
                entries[idx].role = VariantRole::Combined;
            }
        }

        Ok(Self {
            entries,
            has_segments,
        })
    }

    pub fn from_text(text: &str) -> Result<Self, ManifestError> {
        let lines: Vec<&str> = text.lines().collect();
        Self::parse(&lines)
    }

    pub fn entries(&self) -> &[VariantEntry] {
        &self.entries
    }

    /// True when the document has no variant entries but lists media segments.
    pub fn is_media_playlist(&self) -> bool {
        self.entries.is_empty() && self.has_segments
    }

    /// Chooses the video-bearing entry and, when separate, the audio entry.
    ///
    /// Combined renditions are preferred over video-only ones. Among entries
    /// of the same role the rank order from [`rank_order`] decides.
    pub fn select(&self) -> Result<VariantPair, ManifestError> {
        let of_role = |role: VariantRole| -> Vec<&VariantEntry> {
            self.entries.iter().filter(|e| e.role == role).collect()
        };

        let combined = of_role(VariantRole::Combined);
        let (pool, is_combined) = if combined.is_empty() {
            (of_role(VariantRole::Video), false)
        } else {
            (combined, true)
        };

        let video = best(&pool).ok_or(ManifestError::NoVideoEntry)?;
        if is_combined {
            return Ok(VariantPair {
                video: video.uri.clone(),
                audio: None,
                combined: true,
            });
        }

        let audio_entries = of_role(VariantRole::Audio);
        let grouped: Vec<&VariantEntry> = audio_entries
            .iter()
            .copied()
            .filter(|a| video.group.is_some() && a.group == video.group)
            .collect();
        let audio = if grouped.is_empty() {
            best(&audio_entries)
        } else {
            best(&grouped)
        };

        Ok(VariantPair {
            video: video.uri.clone(),
            audio: audio.map(|a| a.uri.clone()),
            combined: false,
        })
    }
}

fn best<'a>(entries: &[&'a VariantEntry]) -> Option<&'a VariantEntry> {
    let candidates = entries
        .iter()
        .map(|e| Candidate {
            url: e.uri.clone(),
            declared: e.bandwidth,
        })
        .collect();
    let top = rank_order(candidates).into_iter().next()?;
    entries.iter().copied().find(|e| e.uri == top)
}

/// Interprets manifest lines into the `(video, audio)` pair, URIs unchanged.
pub fn interpret<S: AsRef<str>>(lines: &[S]) -> Result<VariantPair, ManifestError> {
    ManifestDocument::parse(lines)?.select()
}

/// Interprets a fetched manifest and resolves the chosen URIs against the
/// manifest's own URL.
///
/// A manifest that is itself a media playlist is returned as the combined
/// video URI.
pub fn resolve_variants(manifest_url: &str, text: &str) -> Result<VariantPair, ManifestError> {
    let document = ManifestDocument::from_text(text)?;
    if document.is_media_playlist() {
        return Ok(VariantPair {
            video: manifest_url.to_string(),
            audio: None,
            combined: true,
        });
    }

    let pair = document.select()?;
    Ok(VariantPair {
        video: join_uri(manifest_url, &pair.video)?,
        audio: pair
            .audio
            .as_deref()
            .map(|a| join_uri(manifest_url, a))
            .transpose()?,
        combined: pair.combined,
    })
}

pub(crate) fn join_uri(base: &str, uri: &str) -> Result<String, ManifestError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(uri.to_string());
    }
    let unresolvable = |reason: String| ManifestError::UnresolvableUri {
        uri: uri.to_string(),
        base: base.to_string(),
        reason,
    };
    let base_url = Url::parse(base).map_err(|e| unresolvable(e.to_string()))?;
    base_url
        .join(uri)
        .map(String::from)
        .map_err(|e| unresolvable(e.to_string()))
}

/// Splits an attribute list, keeping quoted values intact, and strips quotes.
pub(crate) fn split_attributes(rest: &str, is_separator: impl Fn(char) -> bool) -> Vec<(String, String)> {
    let mut parts: Vec<&str> = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, ch) in rest.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes && is_separator(ch) {
            parts.push(rest[start..idx].trim());
            start = idx + ch.len_utf8();
        }
    }
    if start < rest.len() {
        parts.push(rest[start..].trim());
    }

    parts
        .into_iter()
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v);
            Some((k.trim().to_ascii_uppercase(), v.to_string()))
        })
        .collect()
}

pub(crate) fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_tags_yield_video_and_audio_unchanged() {
        let lines = [
            "#EXTM3U",
            "#ENTRY role=video",
            "video.manifest",
            "#ENTRY role=audio",
            "audio.manifest",
        ];
        let pair = interpret(&lines).unwrap();
        assert_eq!(pair.video, "video.manifest");
        assert_eq!(pair.audio.as_deref(), Some("audio.manifest"));
        assert!(!pair.combined);
    }

    #[test]
    fn zero_video_entries_is_an_error() {
        let lines = ["#EXTM3U", "#ENTRY role=audio", "audio.manifest"];
        assert_eq!(interpret(&lines), Err(ManifestError::NoVideoEntry));
        assert_eq!(interpret::<&str>(&[]), Err(ManifestError::NoVideoEntry));
    }

    #[test]
    fn combined_entry_has_no_audio() {
        let lines = ["#EXTM3U", "#ENTRY role=combined", "s1_av.m3u8"];
        let pair = interpret(&lines).unwrap();
        assert_eq!(pair.video, "s1_av.m3u8");
        assert_eq!(pair.audio, None);
        assert!(pair.combined);
    }

    #[test]
    fn multiple_video_entries_rank_by_position() {
        let lines = [
            "#ENTRY role=video",
            "low.m3u8",
            "#ENTRY role=video",
            "high.m3u8",
            "#ENTRY role=audio",
            "audio.m3u8",
        ];
        let pair = interpret(&lines).unwrap();
        assert_eq!(pair.video, "high.m3u8");
    }

    #[test]
    fn dangling_entry_tag_is_rejected() {
        let lines = ["#ENTRY role=video", "#ENTRY role=audio", "audio.m3u8"];
        assert_eq!(
            interpret(&lines),
            Err(ManifestError::DanglingTag {
                tag: "#ENTRY".into()
            })
        );
        assert!(matches!(
            interpret(&["#ENTRY role=video"]),
            Err(ManifestError::DanglingTag { .. })
        ));
    }

    #[test]
    fn unknown_role_is_invalid() {
        let lines = ["#ENTRY role=subtitles", "subs.vtt"];
        assert!(matches!(
            interpret(&lines),
            Err(ManifestError::InvalidPlaylist { .. })
        ));
    }

    #[test]
    fn master_playlist_with_audio_rendition() {
        let text = "#EXTM3U\n\
            #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English, main\",URI=\"audio/a.m3u8\"\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,AUDIO=\"aud\"\n\
            v360.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720,AUDIO=\"aud\"\n\
            v720.m3u8\n";
        let lines: Vec<&str> = text.lines().collect();
        let pair = interpret(&lines).unwrap();
        assert_eq!(pair.video, "v720.m3u8");
        assert_eq!(pair.audio.as_deref(), Some("audio/a.m3u8"));
        assert!(!pair.combined);
    }

    #[test]
    fn master_playlist_without_audio_is_combined() {
        let text = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2400000,CODECS=\"avc1.64001f,mp4a.40.2\"\n\
            hi.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,CODECS=\"avc1.64001f,mp4a.40.2\"\n\
            lo.m3u8\n";
        let doc = ManifestDocument::from_text(text).unwrap();
        assert!(doc.entries().iter().all(|e| e.role == VariantRole::Combined));
        let pair = doc.select().unwrap();
        assert_eq!(pair.video, "hi.m3u8");
        assert!(pair.combined);
    }

    #[test]
    fn bare_lines_use_file_name_suffixes() {
        let lines = ["#EXTM3U", "s1_v.m3u8", "s1_a.m3u8", "notes.txt"];
        let doc = ManifestDocument::parse(&lines).unwrap();
        assert_eq!(doc.entries().len(), 2);
        let pair = doc.select().unwrap();
        assert_eq!(pair.video, "s1_v.m3u8");
        assert_eq!(pair.audio.as_deref(), Some("s1_a.m3u8"));
    }

    #[test]
    fn media_playlist_resolves_to_itself() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg0.ts\n#EXTINF:6.0,\nseg1_av.ts\n#EXT-X-ENDLIST\n";
        let doc = ManifestDocument::from_text(text).unwrap();
        assert!(doc.is_media_playlist());

        let pair = resolve_variants("https://content.h/x/s1_av.m3u8", text).unwrap();
        assert_eq!(pair.video, "https://content.h/x/s1_av.m3u8");
        assert!(pair.combined);
    }

    #[test]
    fn resolve_joins_relative_uris() {
        let text = "#EXTM3U\n#ENTRY role=video\nv/video.m3u8\n#ENTRY role=audio\n/abs/audio.m3u8\n";
        let pair = resolve_variants("https://content.h/1/2/master.m3u8", text).unwrap();
        assert_eq!(pair.video, "https://content.h/1/2/v/video.m3u8");
        assert_eq!(pair.audio.as_deref(), Some("https://content.h/abs/audio.m3u8"));
    }

    #[test]
    fn quoted_commas_do_not_split_attributes() {
        let attrs = split_attributes(r#"TYPE=AUDIO,NAME="a, b",URI="x.m3u8""#, |c| c == ',');
        assert_eq!(attr(&attrs, "NAME"), Some("a, b"));
        assert_eq!(attr(&attrs, "URI"), Some("x.m3u8"));
    }
}
