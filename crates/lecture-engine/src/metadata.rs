// Reading lecture metadata blobs.
//
// The portal's JSON is loosely structured and fields go missing between
// deployments, so every accessor here is tolerant: absent or mistyped fields
// yield `None` or an empty list rather than an error.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use manifest::Candidate;
use serde_json::Value;
use tracing::warn;

use crate::error::LectureError;
use crate::model::LectureMedia;

/// Date used when no metadata field carries one.
pub fn fallback_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Normalises a portal timestamp to a calendar date.
///
/// Accepts RFC 3339 (`2024-03-07T09:00:00.000Z`), naive date-times and bare
/// `YYYY-MM-DD` prefixes.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn id_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Lesson date: `startTimeUTC`, then the lesson's `createdAt`.
fn lesson_date(item: &Value) -> Option<NaiveDate> {
    str_at(item, "/lesson/startTimeUTC")
        .and_then(parse_date)
        .or_else(|| str_at(item, "/lesson/lesson/createdAt").and_then(parse_date))
}

/// Group date for a multi-part item: `groupInfo.createdAt` only.
fn group_date(item: &Value, group_name: &str) -> Option<NaiveDate> {
    if let Some(date) = str_at(item, "/groupInfo/createdAt").and_then(parse_date) {
        return Some(date);
    }
    if str_at(item, "/groupInfo/updatedAt").is_some() {
        warn!(
            group = %group_name,
            "Group has no createdAt; ignoring updatedAt and falling back to lesson dates"
        );
    }
    None
}

impl LectureMedia {
    /// Builds a lecture from one syllabus item.
    ///
    /// An item carrying a `lessons` array is a multi-part lecture whose parts
    /// are titled `<group name> - <part title>`.
    pub fn from_syllabus_item(
        item: Value,
        path_prefix: Option<PathBuf>,
    ) -> Result<Self, LectureError> {
        if let Some(lessons) = item.get("lessons").and_then(Value::as_array) {
            let group_name = str_at(&item, "/groupInfo/name").unwrap_or("Untitled group");
            let parts = lessons
                .iter()
                .map(|lesson| {
                    let mut part = Self::single(lesson.clone(), path_prefix.clone())?;
                    part.title = format!("{group_name} - {}", part.title);
                    Ok(part)
                })
                .collect::<Result<Vec<_>, LectureError>>()?;

            let date = group_date(&item, group_name)
                .or_else(|| parts.iter().map(|p| p.date).min())
                .unwrap_or_else(fallback_date);
            let title = group_name.to_string();
            let id = id_at(&item, "/groupInfo/id").unwrap_or_else(|| title.clone());

            return Ok(Self {
                id,
                title,
                date,
                metadata: Arc::new(item),
                path_prefix,
                parts,
            });
        }

        Self::single(item, path_prefix)
    }

    fn single(item: Value, path_prefix: Option<PathBuf>) -> Result<Self, LectureError> {
        let id = id_at(&item, "/lesson/lesson/id").ok_or_else(|| {
            LectureError::config("syllabus lesson has no lesson.lesson.id".to_string())
        })?;
        let title = str_at(&item, "/lesson/lesson/name")
            .unwrap_or("Untitled")
            .to_string();
        let date = lesson_date(&item).unwrap_or_else(fallback_date);
        Ok(Self {
            id,
            title,
            date,
            metadata: Arc::new(item),
            path_prefix,
            parts: Vec::new(),
        })
    }
}

/// Direct progressive files listed in the metadata, in declaration order.
pub fn primary_files(metadata: &Value) -> Vec<Candidate> {
    metadata
        .pointer("/lesson/video/media/media/current/primaryFiles")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|f| {
                    let url = f.get("s3Url")?.as_str()?;
                    Some(Candidate {
                        url: url.to_string(),
                        declared: f.get("quality").and_then(Value::as_u64),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Manifest URIs of the first media version, when the lesson has video.
pub fn manifest_uris(metadata: &Value) -> Vec<String> {
    let flag = |p: &str| metadata.pointer(p).and_then(Value::as_bool) == Some(true);
    if !flag("/lesson/hasVideo") || !flag("/lesson/hasAvailableVideo") {
        return Vec::new();
    }
    metadata
        .pointer("/lesson/video/media/media/versions/0/manifests")
        .and_then(Value::as_array)
        .map(|manifests| {
            manifests
                .iter()
                .filter_map(|m| m.get("uri")?.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// A non-video media item attached to a lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub title: String,
}

fn medias(metadata: &Value) -> impl Iterator<Item = &Value> {
    metadata
        .pointer("/lesson/medias")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Id of the first media entry of type `Video`.
pub fn video_media_id(metadata: &Value) -> Option<String> {
    medias(metadata)
        .find(|m| m.get("mediaType").and_then(Value::as_str) == Some("Video"))
        .and_then(|m| id_at(m, "/id"))
}

pub fn attachments(metadata: &Value) -> Vec<Attachment> {
    medias(metadata)
        .filter(|m| m.get("mediaType").and_then(Value::as_str) != Some("Video"))
        .filter_map(|m| {
            Some(Attachment {
                id: id_at(m, "/id")?,
                title: m.get("title")?.as_str()?.to_string(),
            })
        })
        .collect()
}
