//! Framing codec for RPC messages

use crate::messages::RpcMessage;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// RPC message codec
///
/// Format: [length: u32][payload: bincode serialized message]
#[derive(Debug, Default, Clone, Copy)]
pub struct RpcCodec;

impl RpcCodec {
    /// Maximum message size (16MB)
    pub const MAX_MESSAGE_SIZE: usize = crate::MAX_FRAME_SIZE as usize;
}

impl Encoder<RpcMessage> for RpcCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: RpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&msg)?;

        if payload.len() > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(payload.len()));
        }

        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for RpcCodec {
    type Item = RpcMessage;
    type Error = CodecError;

    /// Returns Ok(Some(message)) if a complete message was decoded,
    /// Ok(None) if more data is needed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 4 bytes for length header
        if src.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = &src[..4];
        let length = length_bytes.get_u32() as usize;

        if length > Self::MAX_MESSAGE_SIZE {
            return Err(CodecError::MessageTooLarge(length));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let msg_bytes = src.split_to(length);
        let msg = bincode::deserialize(&msg_bytes)?;

        Ok(Some(msg))
    }
}
