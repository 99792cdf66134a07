use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{AppError, Result};

pub const DEFAULT_LOG_FILTER: &str = "echodl=info,lecture_engine=info,manifest=info";
const VERBOSE_LOG_FILTER: &str = "echodl=debug,lecture_engine=debug,manifest=debug";

/// Installs the global subscriber.
///
/// Console output goes through the indicatif layer so log lines do not tear
/// progress bars. With `log_dir` set, a daily rolling file is written as well;
/// keep the returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(verbose: bool, quiet: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let indicatif_layer = IndicatifLayer::new();
    let console = fmt::layer()
        .with_target(verbose)
        .with_writer(indicatif_layer.get_stderr_writer());

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "echodl.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(indicatif_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("failed to install log subscriber: {e}")))?;

    Ok(guard)
}
