//! Config file loading and merging with command-line flags.
//!
//! Precedence, highest first: command-line flags (and their environment
//! fallbacks), the TOML config file, built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lecture_engine::{EngineConfig, ErrorKind};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::cli::Args;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub cookie_file: Option<PathBuf>,
    pub pool_size: Option<usize>,
    pub alternative_feeds: Option<bool>,
    pub skip_on_error: Option<bool>,
    pub download_transcripts: Option<bool>,
    pub download_attachments: Option<bool>,
    pub streaming_host: Option<String>,
    pub player_selector: Option<String>,
    pub render_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub mux: MuxSection,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MuxSection {
    pub program: Option<String>,
    pub audio_codec: Option<String>,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub render_timeout: Option<u32>,
    pub stale_content: Option<u32>,
    pub transfer_error: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
}

impl FileConfig {
    /// `<config dir>/echodl/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("echodl").join("config.toml"))
    }

    /// Loads `explicit`, or the default file when it exists. An explicit path
    /// that does not exist is an error; a missing default file means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    debug!("No config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Cookie file from the command line, else from the config file.
    pub fn cookie_file(&self, args: &Args) -> Option<PathBuf> {
        args.cookie_file.clone().or_else(|| self.cookie_file.clone())
    }

    /// Builds the engine configuration for a course hosted on `portal`.
    pub fn engine_config(&self, args: &Args, portal: Url) -> Result<EngineConfig> {
        let mut config = EngineConfig::new(portal);

        if let Some(dir) = args.output.clone().or_else(|| self.output_dir.clone()) {
            config.output_root = dir;
        }
        if let Some(size) = args.pool_size.or(self.pool_size) {
            config.pool_size = size;
        }
        config.alternative_feeds =
            args.alternative_feeds || self.alternative_feeds.unwrap_or(config.alternative_feeds);
        config.skip_on_error =
            !args.no_skip_on_error && self.skip_on_error.unwrap_or(config.skip_on_error);
        config.download_transcripts =
            args.transcripts || self.download_transcripts.unwrap_or(config.download_transcripts);
        config.download_attachments = !args.no_attachments
            && self
                .download_attachments
                .unwrap_or(config.download_attachments);

        config.streaming_host = args
            .streaming_host
            .clone()
            .or_else(|| self.streaming_host.clone());
        config.player_selector = args
            .player_selector
            .clone()
            .or_else(|| self.player_selector.clone());
        if let Some(secs) = args.render_timeout.or(self.render_timeout_secs) {
            config.render_timeout = Duration::from_secs(secs);
        }
        if let Some(agent) = &self.user_agent {
            config.http.user_agent = agent.clone();
        }

        if let Some(program) = args.ffmpeg.clone().or_else(|| self.mux.program.clone()) {
            config.mux.program = program;
        }
        if let Some(codec) = &self.mux.audio_codec {
            config.mux.audio_codec = codec.clone();
        }
        if let Some(ext) = &self.mux.extension {
            config.mux.extension = ext.trim_start_matches('.').to_string();
        }

        let retry = &self.retry;
        for (kind, attempts) in [
            (ErrorKind::RenderTimeout, retry.render_timeout),
            (ErrorKind::StaleContent, retry.stale_content),
            (ErrorKind::TransferError, retry.transfer_error),
        ] {
            if let Some(attempts) = attempts {
                config.retry.set_max_attempts(kind, attempts);
            }
        }
        if let Some(ms) = retry.base_delay_ms {
            config.retry.backoff.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = retry.max_delay_ms {
            config.retry.backoff.max_delay = Duration::from_millis(ms);
        }
        if let Some(jitter) = retry.jitter {
            config.retry.backoff.jitter = jitter;
        }

        config.validate()?;
        Ok(config)
    }
}
