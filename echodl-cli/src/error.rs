use lecture_engine::{LectureError, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lecture engine error: {0}")]
    Lecture(#[from] LectureError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Invalid syllabus JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
