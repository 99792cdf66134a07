// Course discovery: section URL parsing, course naming and the syllabus walk.

use std::collections::VecDeque;
use std::path::PathBuf;

use lecture_engine::{AuthenticatedTransport, LectureMedia, RenderingSession, sanitize_component};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AppError, Result};

/// Folder names that never become part of an output path.
const TRANSPARENT_FOLDERS: &[&str] = &["home", "echo360"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseUrl {
    pub portal: Url,
    pub section_id: String,
}

impl CourseUrl {
    /// Accepts `<portal>/section/<section id>[/...]`.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|e| AppError::InvalidInput(format!("`{input}` is not a URL: {e}")))?;
        let mut segments = url.path_segments().into_iter().flatten();
        let section_id = segments
            .by_ref()
            .find(|s| *s == "section")
            .and_then(|_| segments.next())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "`{input}` is not a course URL (expected <portal>/section/<id>/home)"
                ))
            })?
            .to_string();

        let mut portal = url.clone();
        portal.set_path("");
        portal.set_query(None);
        portal.set_fragment(None);
        Ok(Self { portal, section_id })
    }

    fn base(&self) -> String {
        self.portal.as_str().trim_end_matches('/').to_string()
    }

    pub fn home_url(&self) -> String {
        format!("{}/section/{}/home", self.base(), self.section_id)
    }

    pub fn syllabus_url(&self) -> String {
        format!("{}/section/{}/syllabus", self.base(), self.section_id)
    }
}

/// Course name from the portal page title.
///
/// Titles look like `(CODE) Course name`; the text after the last `)` wins,
/// then the text before the first `(`, then `Course_<section id prefix>`.
pub fn course_name_from_title(title: &str, section_id: &str) -> String {
    let title = title.trim();
    if !title.is_empty() && !title.to_lowercase().starts_with("echo360") {
        if let Some((_, after)) = title.rsplit_once(')')
            && !after.trim().is_empty()
        {
            return after.trim().to_string();
        }
        if let Some((before, _)) = title.split_once('(')
            && !before.trim().is_empty()
        {
            return before.trim().to_string();
        }
        if !title.contains(['(', ')']) {
            return title.to_string();
        }
    }
    let prefix: String = section_id.chars().take(8).collect();
    format!("Course_{prefix}")
}

pub async fn fetch_course_name(
    session: &mut dyn RenderingSession,
    course: &CourseUrl,
) -> Result<String> {
    session.navigate(&course.home_url()).await?;
    let title = session.current_title().await?;
    debug!(title = %title, "Course page title");
    Ok(course_name_from_title(&title, &course.section_id))
}

pub async fn fetch_syllabus(
    transport: &dyn AuthenticatedTransport,
    course: &CourseUrl,
) -> Result<Value> {
    let text = transport.get_text(&course.syllabus_url()).await?;
    Ok(serde_json::from_str(&text)?)
}

fn is_lesson(item: &Value) -> bool {
    match item.get("type").and_then(Value::as_str) {
        Some(kind) => kind.to_lowercase().contains("lesson"),
        None => item.get("lesson").is_some(),
    }
}

/// Walks the syllabus breadth first and returns its lectures in ascending date
/// order. Ties keep syllabus order.
pub fn walk_syllabus(syllabus: &Value, course_name: &str) -> Vec<LectureMedia> {
    let Some(root) = syllabus.get("data").and_then(Value::as_array) else {
        warn!("Syllabus has no `data` array");
        return Vec::new();
    };

    let course_folder = sanitize_component(course_name).to_lowercase();
    let mut lectures = Vec::new();
    let mut queue: VecDeque<(&[Value], Option<PathBuf>)> = VecDeque::from([(root.as_slice(), None)]);

    while let Some((items, prefix)) = queue.pop_front() {
        for item in items.iter().filter(|item| item.is_object()) {
            if is_lesson(item) {
                match LectureMedia::from_syllabus_item(item.clone(), prefix.clone()) {
                    Ok(lecture) => lectures.push(lecture),
                    Err(e) => warn!(error = %e, "Ignoring malformed syllabus lesson"),
                }
                continue;
            }

            let Some(group) = item.get("groupInfo") else {
                continue;
            };
            let Some(children) = item.get("lessons").and_then(Value::as_array) else {
                continue;
            };
            let name = group.get("name").and_then(Value::as_str).unwrap_or_default();
            let folder = sanitize_component(name);
            let lowered = folder.to_lowercase();

            let child_prefix = if name.trim().is_empty()
                || TRANSPARENT_FOLDERS.contains(&lowered.as_str())
                || lowered == course_folder
            {
                prefix.clone()
            } else {
                Some(match &prefix {
                    Some(parent) => parent.join(&folder),
                    None => PathBuf::from(&folder),
                })
            };
            queue.push_back((children.as_slice(), child_prefix));
        }
    }

    lectures.sort_by_key(|lecture| lecture.date);
    info!(count = lectures.len(), "Found lectures in syllabus");
    lectures
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_course_url() {
        let course = CourseUrl::parse("https://echo360.org.uk/section/1a2b3c4d-xyz/home?x=1").unwrap();
        assert_eq!(course.section_id, "1a2b3c4d-xyz");
        assert_eq!(course.portal.as_str(), "https://echo360.org.uk/");
        assert_eq!(
            course.syllabus_url(),
            "https://echo360.org.uk/section/1a2b3c4d-xyz/syllabus"
        );
        assert!(CourseUrl::parse("https://echo360.org.uk/home").is_err());
        assert!(CourseUrl::parse("not a url").is_err());
    }

    #[test]
    fn course_names_from_titles() {
        assert_eq!(course_name_from_title("(COMP1001) Systems", "abcdef123"), "Systems");
        assert_eq!(course_name_from_title("Systems (COMP1001)", "abcdef123"), "Systems");
        assert_eq!(course_name_from_title("Plain Title", "abcdef123"), "Plain Title");
        assert_eq!(course_name_from_title("(COMP1001)", "abcdef123"), "Course_abcdef12");
        assert_eq!(course_name_from_title("Echo360", "abcdef123"), "Course_abcdef12");
        assert_eq!(course_name_from_title("", "abc"), "Course_abc");
    }

    fn lesson(id: &str, date: &str) -> Value {
        json!({
            "type": "SyllabusLessonType",
            "lesson": { "lesson": { "id": id, "name": id }, "startTimeUTC": date }
        })
    }

    #[test]
    fn walk_builds_prefixes_and_sorts_by_date() {
        let syllabus = json!({ "data": [
            lesson("late", "2024-03-01T00:00:00Z"),
            { "type": "SyllabusGroupType", "groupInfo": { "name": "Home" }, "lessons": [
                lesson("home-child", "2024-01-15T00:00:00Z")
            ]},
            { "type": "SyllabusGroupType", "groupInfo": { "name": "Week 1" }, "lessons": [
                lesson("w1", "2024-01-10T00:00:00Z"),
                { "type": "SyllabusGroupType", "groupInfo": { "name": "Labs" }, "lessons": [
                    lesson("lab", "2024-01-11T00:00:00Z")
                ]}
            ]},
            { "type": "SyllabusGroupType", "groupInfo": { "name": "Systems" }, "lessons": [
                lesson("same-name", "2024-01-12T00:00:00Z")
            ]},
            "not an object"
        ]});

        let lectures = walk_syllabus(&syllabus, "Systems");
        let ids: Vec<&str> = lectures.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["w1", "lab", "same-name", "home-child", "late"]);

        let prefix = |id: &str| {
            lectures
                .iter()
                .find(|l| l.id == id)
                .and_then(|l| l.path_prefix.clone())
        };
        assert_eq!(prefix("w1"), Some(PathBuf::from("Week 1")));
        assert_eq!(prefix("lab"), Some(PathBuf::from("Week 1").join("Labs")));
        assert_eq!(prefix("home-child"), None);
        assert_eq!(prefix("same-name"), None);
        assert_eq!(prefix("late"), None);
    }

    #[test]
    fn multi_part_lesson_is_one_lecture() {
        let syllabus = json!({ "data": [{
            "type": "SyllabusLessonType",
            "groupInfo": { "name": "Double lecture", "createdAt": "2024-02-01T00:00:00Z" },
            "lessons": [lesson("a", "2024-02-01T09:00:00Z"), lesson("b", "2024-02-01T11:00:00Z")]
        }]});
        let lectures = walk_syllabus(&syllabus, "Course");
        assert_eq!(lectures.len(), 1);
        assert_eq!(lectures[0].parts.len(), 2);
    }

    #[test]
    fn missing_data_yields_nothing() {
        assert!(walk_syllabus(&json!({ "status": "ok" }), "Course").is_empty());
    }
}
