use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest has no video-bearing entry")]
    NoVideoEntry,

    #[error("manifest tag `{tag}` is not followed by a URI")]
    DanglingTag { tag: String },

    #[error("invalid playlist: {reason}")]
    InvalidPlaylist { reason: String },

    #[error("playlist is encrypted with `{method}`")]
    Encrypted { method: String },

    #[error("cannot resolve `{uri}` against `{base}`: {reason}")]
    UnresolvableUri {
        uri: String,
        base: String,
        reason: String,
    },
}

impl ManifestError {
    pub fn invalid_playlist(reason: impl Into<String>) -> Self {
        Self::InvalidPlaylist {
            reason: reason.into(),
        }
    }
}
