use std::path::PathBuf;

use clap::Parser;

/// Download every recorded lecture of an Echo360 course, remux it into a
/// single file and optionally save cleaned transcripts.
#[derive(Debug, Parser)]
#[command(name = "echodl", version, about, long_about = None)]
pub struct Args {
    /// Course URL, e.g. https://echo360.org.uk/section/<section id>/home
    #[arg(value_name = "COURSE_URL")]
    pub course_url: String,

    /// Config file (TOML). Defaults to <config dir>/echodl/config.toml when present.
    #[arg(short, long, env = "ECHODL_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory below which one folder per course is created
    #[arg(short, long, env = "ECHODL_OUTPUT", value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// File with the portal session cookies (`name=value` pairs, `;` or newline separated)
    #[arg(long, env = "ECHODL_COOKIES", value_name = "FILE")]
    pub cookie_file: Option<PathBuf>,

    /// Parallel segment transfers per lecture
    #[arg(short = 'j', long, value_name = "N")]
    pub pool_size: Option<usize>,

    /// Fetch up to two feeds per lecture, suffixed 1 and 2
    #[arg(long)]
    pub alternative_feeds: bool,

    /// Abort the run on the first lecture that cannot be processed
    #[arg(long)]
    pub no_skip_on_error: bool,

    /// Download VTT transcripts and write cleaned text copies
    #[arg(long)]
    pub transcripts: bool,

    /// Do not download slides and other lesson attachments
    #[arg(long)]
    pub no_attachments: bool,

    /// Host that offloaded manifest URLs are rewritten to
    #[arg(long, value_name = "HOST")]
    pub streaming_host: Option<String>,

    /// Element id that marks a fully rendered lesson page
    #[arg(long, value_name = "ID")]
    pub player_selector: Option<String>,

    /// Seconds to wait for a lesson page to render
    #[arg(long, value_name = "SECS")]
    pub render_timeout: Option<u64>,

    /// Mux program name or path
    #[arg(long, env = "ECHODL_FFMPEG", value_name = "PATH")]
    pub ffmpeg: Option<String>,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Also write daily rolling log files into this directory
    #[arg(long, env = "ECHODL_LOG_DIR", value_name = "DIR")]
    pub log_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "echodl",
            "https://echo360.org.uk/section/abc/home",
            "-j",
            "8",
            "--alternative-feeds",
            "--transcripts",
            "-v",
        ])
        .unwrap();
        assert_eq!(args.pool_size, Some(8));
        assert!(args.alternative_feeds);
        assert!(args.transcripts);
        assert!(!args.no_attachments);
        assert!(args.verbose);
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["echodl", "https://h/section/a/home", "-v", "-q"]).is_err());
    }
}
