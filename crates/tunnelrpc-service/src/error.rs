use std::time::Duration;
use thiserror::Error;
use tunnelrpc_proto::{CodecError, DecodeError, EncodeError};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Call cancelled")]
    Cancelled,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote exception: {0}")]
    Remote(String),

    #[error("Failed to decode result: {0}")]
    Decode(#[from] DecodeError),

    #[error("Failed to encode params: {0}")]
    Encode(#[from] EncodeError),
}

impl RpcError {
    /// True when the call never produced a result the agent vouched for:
    /// the caller should treat the push as failed and may retry it
    pub fn is_transport(&self) -> bool {
        !matches!(self, RpcError::Encode(_))
    }
}
