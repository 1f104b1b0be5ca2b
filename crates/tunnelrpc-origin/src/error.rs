use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("{url} is not a valid URL: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("Unsupported origin URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Origin URL has no host: {0}")]
    MissingHost(String),

    #[error("Failed to load origin CA pool {path}: {reason}")]
    CaPool { path: String, reason: String },

    #[error("Invalid origin server name: {0}")]
    InvalidServerName(String),

    #[error("Failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("No usable address for {0}")]
    NoAddress(String),

    #[error("Connecting to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("TLS handshake with {address} failed: {source}")]
    TlsHandshake {
        address: String,
        source: std::io::Error,
    },

    #[error("TLS handshake with {address} timed out after {timeout:?}")]
    TlsHandshakeTimeout { address: String, timeout: Duration },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not implemented error")]
    NotImplemented,
}
