//! Origin descriptors
//!
//! An [`Origin`] says how a reverse-proxy route reaches its backend. The set of
//! variants is closed: every `match` over it is exhaustive, so adding a variant
//! without teaching the wire codec about it fails to compile.

use crate::config::duration_nanos;
use crate::wire::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Origin variant carried by a reverse-proxy route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Http(HttpOriginConfig),
    WebSocket(WebSocketOriginConfig),
    HelloWorld(HelloWorldOriginConfig),
}

impl Origin {
    pub fn kind(&self) -> OriginKind {
        match self {
            Origin::Http(_) => OriginKind::Http,
            Origin::WebSocket(_) => OriginKind::WebSocket,
            Origin::HelloWorld(_) => OriginKind::HelloWorld,
        }
    }
}

impl From<HttpOriginConfig> for Origin {
    fn from(config: HttpOriginConfig) -> Self {
        Origin::Http(config)
    }
}

impl From<WebSocketOriginConfig> for Origin {
    fn from(config: WebSocketOriginConfig) -> Self {
        Origin::WebSocket(config)
    }
}

impl From<HelloWorldOriginConfig> for Origin {
    fn from(config: HelloWorldOriginConfig) -> Self {
        Origin::HelloWorld(config)
    }
}

/// Wire discriminant of an origin variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OriginKind {
    Http = 0,
    WebSocket = 1,
    HelloWorld = 2,
}

impl TryFrom<u16> for OriginKind {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OriginKind::Http),
            1 => Ok(OriginKind::WebSocket),
            2 => Ok(OriginKind::HelloWorld),
            _ => Err(DecodeError::UnknownVariant {
                union: "origin",
                discriminant: value,
            }),
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OriginKind::Http => "Http",
            OriginKind::WebSocket => "WebSocket",
            OriginKind::HelloWorld => "HelloWorld",
        };
        f.write_str(name)
    }
}

/// Plain HTTP(S) or unix-socket origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpOriginConfig {
    pub url_string: String,
    #[serde(with = "duration_nanos")]
    pub tcp_keep_alive: Duration,
    pub dial_dual_stack: bool,
    #[serde(with = "duration_nanos")]
    pub tls_handshake_timeout: Duration,
    pub tls_verify: bool,
    pub origin_ca_pool: String,
    pub origin_server_name: String,
    pub max_idle_connections: u64,
    #[serde(with = "duration_nanos")]
    pub idle_connection_timeout: Duration,
    #[serde(with = "duration_nanos")]
    pub proxy_connection_timeout: Duration,
    #[serde(with = "duration_nanos")]
    pub expect_continue_timeout: Duration,
    pub chunked_encoding: bool,
}

/// Origin reached through a websocket upgrade
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketOriginConfig {
    pub url_string: String,
    pub tls_verify: bool,
    pub origin_ca_pool: String,
    pub origin_server_name: String,
}

/// Built-in test origin, carries no settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloWorldOriginConfig {}
