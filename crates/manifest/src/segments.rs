// Media playlist expansion: turns a VOD media playlist into the ordered list
// of segment requests whose bodies, appended in order, form one raw artifact.

use m3u8_rs::{KeyMethod, MediaPlaylist, Playlist, parse_playlist_res};
use tracing::trace;

use crate::error::ManifestError;
use crate::variant::{attr, join_uri, split_attributes};

/// Inclusive-start byte window of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub offset: u64,
    pub length: u64,
}

impl ByteSpan {
    /// Value for an HTTP `Range` header.
    pub fn range_header(&self) -> String {
        let last = self.offset + self.length.saturating_sub(1);
        format!("bytes={}-{}", self.offset, last)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// Absolute URI.
    pub uri: String,
    pub byte_range: Option<ByteSpan>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentList {
    /// `EXT-X-MAP` initialisation section, fetched before any segment.
    pub init: Option<SegmentRef>,
    pub segments: Vec<SegmentRef>,
}

impl SegmentList {
    /// All requests in write order: the init section first, then segments.
    pub fn requests(&self) -> impl Iterator<Item = &SegmentRef> {
        self.init.iter().chain(self.segments.iter())
    }

    pub fn len(&self) -> usize {
        self.segments.len() + usize::from(self.init.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// True when the text lists media segments rather than renditions.
pub fn is_media_playlist(text: &str) -> bool {
    text.lines().any(|l| l.trim_start().starts_with("#EXTINF"))
}

/// Parses a media playlist and resolves every segment against `base_url`.
pub fn parse_segment_list(text: &str, base_url: &str) -> Result<SegmentList, ManifestError> {
    let playlist = match parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MediaPlaylist(pl)) => pl,
        Ok(Playlist::MasterPlaylist(_)) => {
            return Err(ManifestError::invalid_playlist(
                "expected a media playlist, got a master playlist",
            ));
        }
        Err(e) => {
            return Err(ManifestError::invalid_playlist(format!(
                "failed to parse media playlist: {e}"
            )));
        }
    };

    let init = init_section(&playlist, base_url)?;

    let mut segments = Vec::with_capacity(playlist.segments.len());
    let mut last_uri: Option<String> = None;
    let mut last_range_end: Option<(String, u64)> = None;

    for (idx, segment) in playlist.segments.iter().enumerate() {
        if let Some(key) = &segment.key
            && key.method != KeyMethod::None
        {
            return Err(ManifestError::Encrypted {
                method: format!("{:?}", key.method),
            });
        }

        // A byte-range entry may omit the URI and reuse the previous one.
        let raw_uri = match segment.uri.trim() {
            "" if segment.byte_range.is_some() => last_uri.clone().ok_or_else(|| {
                ManifestError::invalid_playlist(format!("segment {idx} has no URI"))
            })?,
            "" => {
                return Err(ManifestError::invalid_playlist(format!(
                    "segment {idx} has no URI"
                )));
            }
            uri => uri.to_string(),
        };
        last_uri = Some(raw_uri.clone());

        let byte_range = match &segment.byte_range {
            Some(range) => {
                let offset = range
                    .offset
                    .or_else(|| {
                        last_range_end
                            .as_ref()
                            .filter(|(uri, _)| *uri == raw_uri)
                            .map(|(_, end)| *end)
                    })
                    .ok_or_else(|| {
                        ManifestError::invalid_playlist(format!(
                            "segment {idx} has a byte range without offset and nothing to infer it from"
                        ))
                    })?;
                last_range_end = Some((raw_uri.clone(), offset.saturating_add(range.length)));
                Some(ByteSpan {
                    offset,
                    length: range.length,
                })
            }
            None => {
                last_range_end = None;
                None
            }
        };

        segments.push(SegmentRef {
            uri: join_uri(base_url, &raw_uri)?,
            byte_range,
        });
    }

    trace!(
        segments = segments.len(),
        has_init = init.is_some(),
        "Expanded media playlist"
    );
    Ok(SegmentList { init, segments })
}

fn init_section(
    playlist: &MediaPlaylist,
    base_url: &str,
) -> Result<Option<SegmentRef>, ManifestError> {
    let from_segment = playlist
        .segments
        .iter()
        .find_map(|s| s.map.as_ref())
        .map(|m| {
            (
                m.uri.clone(),
                m.byte_range.as_ref().map(|r| ByteSpan {
                    offset: r.offset.unwrap_or(0),
                    length: r.length,
                }),
            )
        });

    // Some playlists put the map before any segment, where it lands in the
    // unknown tags instead.
    let from_header = || {
        let rest = playlist
            .unknown_tags
            .iter()
            .rev()
            .find(|t| t.tag == "X-MAP")?
            .rest
            .as_deref()?;
        let attrs = split_attributes(rest, |c| c == ',');
        let uri = attr(&attrs, "URI")?.to_string();
        let byte_range = attr(&attrs, "BYTERANGE").and_then(|v| {
            let (len, offset) = v.split_once('@').unwrap_or((v, "0"));
            Some(ByteSpan {
                offset: offset.trim().parse().ok()?,
                length: len.trim().parse().ok()?,
            })
        });
        Some((uri, byte_range))
    };

    match from_segment.or_else(from_header) {
        Some((uri, byte_range)) => Ok(Some(SegmentRef {
            uri: join_uri(base_url, &uri)?,
            byte_range,
        })),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://content.h/lecture/s1_av.m3u8";

    #[test]
    fn segments_keep_playlist_order_and_resolve() {
        let text = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n\
            #EXTINF:6.0,\nseg-0.ts\n#EXTINF:6.0,\nseg-1.ts\n#EXTINF:4.2,\nhttps://cdn.h/seg-2.ts\n#EXT-X-ENDLIST\n";
        let list = parse_segment_list(text, BASE).unwrap();
        let uris: Vec<&str> = list.requests().map(|s| s.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "https://content.h/lecture/seg-0.ts",
                "https://content.h/lecture/seg-1.ts",
                "https://cdn.h/seg-2.ts",
            ]
        );
        assert!(list.init.is_none());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn init_map_comes_first() {
        let text = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-TARGETDURATION:6\n\
            #EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:6.0,\nseg-0.m4s\n#EXT-X-ENDLIST\n";
        let list = parse_segment_list(text, BASE).unwrap();
        let first = list.requests().next().unwrap();
        assert_eq!(first.uri, "https://content.h/lecture/init.mp4");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn byte_range_offsets_are_inferred() {
        let text = "#EXTM3U\n#EXT-X-VERSION:4\n#EXT-X-TARGETDURATION:6\n\
            #EXTINF:6.0,\n#EXT-X-BYTERANGE:100@0\nall.ts\n\
            #EXTINF:6.0,\n#EXT-X-BYTERANGE:50\nall.ts\n#EXT-X-ENDLIST\n";
        let list = parse_segment_list(text, BASE).unwrap();
        assert_eq!(
            list.segments[1].byte_range,
            Some(ByteSpan {
                offset: 100,
                length: 50
            })
        );
        assert_eq!(
            list.segments[1].byte_range.unwrap().range_header(),
            "bytes=100-149"
        );
    }

    #[test]
    fn encrypted_playlist_is_rejected() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:6.0,\nseg-0.ts\n#EXT-X-ENDLIST\n";
        assert!(matches!(
            parse_segment_list(text, BASE),
            Err(ManifestError::Encrypted { .. })
        ));
    }

    #[test]
    fn master_playlist_is_not_a_segment_list() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nv.m3u8\n";
        assert!(matches!(
            parse_segment_list(text, BASE),
            Err(ManifestError::InvalidPlaylist { .. })
        ));
        assert!(!is_media_playlist(text));
    }
}
