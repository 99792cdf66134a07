// Manifest handling for recorded lecture streams.
//
// Two layers live here:
// - `variant`: classifies the entries of a top-level manifest into video, audio
//   and combined renditions and picks the pair to download.
// - `segments`: expands a media playlist into the ordered list of segment
//   references the fetcher downloads.
pub mod error;
pub mod rank;
pub mod segments;
pub mod variant;

pub use error::ManifestError;
pub use rank::{Candidate, rank_order};
pub use segments::{ByteSpan, SegmentList, SegmentRef, is_media_playlist, parse_segment_list};
pub use variant::{
    ManifestDocument, VariantEntry, VariantPair, VariantRole, interpret, resolve_variants,
};

/// Suffix that marks a manifest carrying both audio and video.
pub const COMBINED_SUFFIX: &str = "av.m3u8";

/// Returns true when the URL path looks like an adaptive-streaming manifest.
pub fn is_manifest_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".m3u8")
}
