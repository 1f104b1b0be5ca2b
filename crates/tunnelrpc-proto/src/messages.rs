//! RPC envelope
//!
//! Calls are multiplexed over one byte stream by `call_id`. The envelope is
//! serialized with bincode; `params` and `results` hold bytes produced by the
//! configuration wire schema (see [`crate::schema`]).

use serde::{Deserialize, Serialize};

/// Remotely invocable methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    UseConfiguration,
}

impl Method {
    /// Stable method number carried in [`RpcMessage::Call`]
    pub fn id(&self) -> u16 {
        match self {
            Method::UseConfiguration => 0,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Method::UseConfiguration),
            _ => None,
        }
    }
}

/// Messages exchanged between the control plane and the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMessage {
    /// Caller starts a call
    Call {
        call_id: u64,
        method: u16,
        params: Vec<u8>,
    },
    /// Callee accepted the call; the result follows later
    Ack { call_id: u64 },
    /// Callee completed the call
    Return { call_id: u64, results: Vec<u8> },
    /// Callee rejected or failed the call; no result will follow
    Exception { call_id: u64, reason: String },
}

impl RpcMessage {
    pub fn call_id(&self) -> u64 {
        match self {
            RpcMessage::Call { call_id, .. }
            | RpcMessage::Ack { call_id }
            | RpcMessage::Return { call_id, .. }
            | RpcMessage::Exception { call_id, .. } => *call_id,
        }
    }
}
