//! Origin connectors for reverse-proxy routes
//!
//! Every [`Origin`] variant can build a live connector through
//! [`BuildOriginService`]:
//!
//! - **Http**: dials TCP (optionally TLS) or a unix socket and sends HTTP/1.1
//!   requests through hyper, keeping a small pool of idle connections
//! - **WebSocket**: opens a client websocket towards the origin, forwarding
//!   the inbound request headers minus the handshake ones
//! - **HelloWorld**: has no connector
//!
//! The [`relay`] module moves bytes between an accepted stream and an origin.
//!
//! [`Origin`]: tunnelrpc_proto::Origin

pub mod dial;
pub mod error;
pub mod http;
pub mod relay;
pub mod service;
pub mod stream;
pub mod tls;
pub mod websocket;

pub use dial::Dialer;
pub use error::OriginError;
pub use http::HttpOriginService;
pub use relay::{
    accept_upgrade, generate_accept_key, is_websocket_upgrade, relay, relay_websocket,
    WebSocketProxyServer,
};
pub use service::{BuildOriginService, OriginService};
pub use stream::OriginStream;
pub use websocket::{strip_websocket_headers, WebSocketOriginService};
