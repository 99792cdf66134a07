use std::sync::Arc;

use indicatif::ProgressStyle;
use lecture_engine::{ProgressEvent, ProgressSink, RunSummary};
use tracing::{Span, debug, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

/// Span whose progress bar counts the course's lectures. Per-artifact bars
/// from the fetcher appear as its children.
pub fn course_span(course: &str, lectures: usize) -> Span {
    let span = info_span!("course", name = %course);
    if let Ok(style) = ProgressStyle::with_template(
        "{span_child_prefix}{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} lectures {msg}",
    ) {
        span.pb_set_style(&style.progress_chars("#>-"));
    }
    span.pb_set_length(lectures as u64);
    span
}

/// Progress sink that drives the course bar.
pub fn course_progress(span: Span) -> ProgressSink {
    Arc::new(move |event| match event {
        ProgressEvent::LectureStarted { title, index, .. } => {
            span.pb_set_position(index as u64);
            span.pb_set_message(&title);
        }
        ProgressEvent::Remuxing { output } => {
            let name = output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            span.pb_set_message(&format!("remuxing {name}"));
        }
        ProgressEvent::ArtifactSkipped { role, path } => {
            debug!(role = %role, path = %path.display(), "Reusing artifact");
        }
        _ => {}
    })
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Summary: {summary}");
    for failure in &summary.skipped {
        println!("  skipped  {failure}");
    }
    for failure in &summary.failed {
        println!("  failed   {failure}");
    }
    let counts = summary.counts_by_kind();
    if !counts.is_empty() {
        let by_kind: Vec<String> = counts
            .iter()
            .map(|(kind, count)| format!("{kind}: {count}"))
            .collect();
        println!("  by kind  {}", by_kind.join(", "));
    }
}
