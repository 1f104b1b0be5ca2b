use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("error on request {0}")]
    ServerError(u16),

    #[error("Failed to fetch resource after {0} attempts")]
    Exhausted(u32),

    #[error("No certificate at {0}")]
    MissingCertificate(PathBuf),
}

impl LoginError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoginError::Io {
            path: path.into(),
            source,
        }
    }
}
