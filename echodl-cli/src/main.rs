mod cli;
mod config;
mod course;
mod error;
mod input;
mod logging;
mod progress;
mod session;

use std::process;
use std::sync::Arc;

use clap::Parser;
use lecture_engine::{
    CancellationToken, CookieSnapshot, FfmpegMuxTool, HttpTransport, HttpTransportFactory,
    LecturePipeline, RenderingSession, install_rustls_provider,
};
use tracing::{Instrument, error, info, warn};

use crate::cli::Args;
use crate::config::FileConfig;
use crate::course::{CourseUrl, fetch_course_name, fetch_syllabus, walk_syllabus};
use crate::error::{AppError, Result};
use crate::session::{HttpSession, load_cookie_file};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_guard = match logging::init_logging(args.verbose, args.quiet, args.log_file.as_deref())
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    let result = run(args).await;
    if let Err(e) = &result {
        error!("{e}");
        eprintln!("Error: {e}");
    }
    // Flush the file writer before exiting.
    drop(log_guard);
    if result.is_err() {
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    install_rustls_provider();

    let file_config = FileConfig::load(args.config.as_deref())?;
    let course = CourseUrl::parse(&args.course_url)?;
    let config = file_config.engine_config(&args, course.portal.clone())?;

    let cookie_file = file_config.cookie_file(&args).ok_or_else(|| {
        AppError::Config("a cookie file is required (--cookie-file or `cookie_file`)".into())
    })?;
    let cookies = load_cookie_file(&cookie_file)?;
    let mut session = HttpSession::new(&config.http, cookies)?;

    let course_name = fetch_course_name(&mut session, &course).await?;
    info!(course = %course_name, section = %course.section_id, "Resolved course");

    let syllabus_transport =
        HttpTransport::new(&config.http, &CookieSnapshot::capture(&session))?;
    let syllabus = fetch_syllabus(&syllabus_transport, &course).await?;
    let lectures = walk_syllabus(&syllabus, &course_name);
    if lectures.is_empty() {
        warn!("No lectures found in the course syllabus");
        return Ok(());
    }

    let mux = FfmpegMuxTool::new(&config.mux);
    match mux.version().await {
        Some(version) => info!(%version, "Using mux tool"),
        None => warn!(
            program = %config.mux.program,
            "Mux tool not found; manifest lectures will keep their raw video/audio files"
        ),
    }

    let token = CancellationToken::new();
    let input_task = input::spawn_input_handler(token.clone());
    let signal_task = input::spawn_signal_handler(token.clone());

    let span = progress::course_span(&course_name, lectures.len());
    let pipeline = LecturePipeline::new(
        config.clone(),
        &course_name,
        Arc::new(HttpTransportFactory::new(config.http.clone())),
        Arc::new(mux),
        token.clone(),
        Some(progress::course_progress(span.clone())),
    );
    info!(
        lectures = lectures.len(),
        output = %pipeline.layout().course_dir().display(),
        "Starting downloads (press q to stop)"
    );

    let session: &mut dyn RenderingSession = &mut session;
    let summary = pipeline.run(&lectures, session).instrument(span).await;

    token.cancel();
    if let Some(task) = input_task {
        let _ = task.await;
    }
    let _ = signal_task.await;

    progress::print_summary(&summary);

    if summary.aborted() {
        return Err(AppError::Aborted(summary.to_string()));
    }
    Ok(())
}
