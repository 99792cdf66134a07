//! Output naming and directory layout.
//!
//! The lecture key `<YYYY-MM-DD>_<sanitized title>` is a pure function of the
//! lecture date and title. Every skip-if-exists check is made against paths
//! derived from it, which is what makes reruns idempotent.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::warn;

use crate::model::StreamRole;

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Makes `input` usable as a single path component on every platform.
///
/// Invalid and control characters become `_` (runs collapse to one),
/// trailing spaces and dots are trimmed, reserved device names get a `_`
/// prefix, and an empty result becomes `_`.
pub fn sanitize_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_replacement = false;
    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                out.push('_');
                last_was_replacement = true;
            }
        } else {
            out.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = out.trim_start().trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        return "_".to_string();
    }

    let upper = trimmed.to_uppercase();
    let stem = upper.split('.').next().unwrap_or(&upper);
    if RESERVED_NAMES.contains(&stem) {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// `<YYYY-MM-DD>_<sanitized title>`.
pub fn lecture_key(date: NaiveDate, title: &str) -> String {
    format!("{}_{}", date.format("%Y-%m-%d"), sanitize_component(title))
}

/// Key of feed `index` (0-based) when alternative feeds are enabled.
pub fn feed_key(key: &str, index: usize, alternative_feeds: bool) -> String {
    if alternative_feeds {
        format!("{key}{}", index + 1)
    } else {
        key.to_string()
    }
}

/// Directory layout of one course.
///
/// ```text
/// <root>/<course>/dirty/[<prefix>/]<key>.<ext>
/// <root>/<course>/clean/[<prefix>/]<key>.txt
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseLayout {
    course_dir: PathBuf,
}

impl CourseLayout {
    pub fn new(output_root: &Path, course: &str) -> Self {
        Self {
            course_dir: output_root.join(sanitize_component(course)),
        }
    }

    pub fn course_dir(&self) -> &Path {
        &self.course_dir
    }

    pub fn dirty_dir(&self, prefix: Option<&Path>) -> PathBuf {
        with_prefix(self.course_dir.join("dirty"), prefix)
    }

    pub fn clean_dir(&self, prefix: Option<&Path>) -> PathBuf {
        with_prefix(self.course_dir.join("clean"), prefix)
    }

    pub fn final_path(&self, prefix: Option<&Path>, key: &str, extension: &str) -> PathBuf {
        self.dirty_dir(prefix).join(format!("{key}.{extension}"))
    }

    /// Raw artifact for one stream role of a manifest source.
    pub fn artifact_path(&self, prefix: Option<&Path>, key: &str, role: StreamRole) -> PathBuf {
        let name = match role {
            StreamRole::Video => format!("{key}_video.ts"),
            StreamRole::Audio => format!("{key}_audio.ts"),
            StreamRole::File => format!("{key}.mp4"),
        };
        self.dirty_dir(prefix).join(name)
    }

    pub fn transcript_raw_path(&self, prefix: Option<&Path>, key: &str) -> PathBuf {
        self.dirty_dir(prefix).join(format!("{key}.vtt"))
    }

    pub fn transcript_clean_path(&self, prefix: Option<&Path>, key: &str) -> PathBuf {
        self.clean_dir(prefix).join(format!("{key}.txt"))
    }
}

fn with_prefix(dir: PathBuf, prefix: Option<&Path>) -> PathBuf {
    match prefix {
        Some(p) if !p.as_os_str().is_empty() => dir.join(p),
        _ => dir,
    }
}

/// Sibling path used while a file is still being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Hidden file recording how many feeds a lecture resolved to when
/// alternative feeds are enabled.
pub fn feed_count_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!(".{key}.feeds"))
}

/// Removes `path`, logging anything other than "not found".
pub(crate) async fn remove_if_present(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}
