//! Tunnel RPC protocol definitions
//!
//! This crate defines the configuration model pushed by the control plane to a
//! running agent, the binary wire schema it travels in, the partial-failure
//! result returned for each push, and the RPC envelope that carries both.

pub mod codec;
pub mod config;
pub mod messages;
pub mod origin;
pub mod result;
pub mod schema;
pub mod wire;

pub use codec::{CodecError, RpcCodec};
pub use config::{
    ClientConfig, DoHProxyConfig, EdgeConnectionConfig, ReverseProxyConfig, SubConfig,
    SupervisorConfig, Version,
};
pub use messages::{Method, RpcMessage};
pub use origin::{
    HelloWorldOriginConfig, HttpOriginConfig, Origin, OriginKind, WebSocketOriginConfig,
};
pub use result::{
    ApplyError, ApplyOutcome, ApplyReport, FailedConfig, ResultBuilder, SubConfigRef,
    UseConfigurationResult,
};
pub use schema::{decode, encode, WireStruct};
pub use wire::{DecodeError, EncodeError, WireReader, WireType, WireWriter};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
