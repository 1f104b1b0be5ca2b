//! `UseConfiguration` RPC service
//!
//! The control plane (client side) pushes a [`ClientConfig`] to the agent
//! (server side) over any byte stream. The server acknowledges the call as
//! soon as the parameters decode, applies the configuration through a
//! [`ConfigApplier`], and returns a [`UseConfigurationResult`] naming every
//! sub-config that failed.
//!
//! [`ClientConfig`]: tunnelrpc_proto::ClientConfig
//! [`UseConfigurationResult`]: tunnelrpc_proto::UseConfigurationResult

pub mod applier;
pub mod client;
pub mod error;
pub mod pending;
pub mod server;

pub use applier::ConfigApplier;
pub use client::{ClientServiceClient, ClientSettings, PendingConfiguration};
pub use error::RpcError;
pub use pending::{PendingCalls, Reply};
pub use server::ClientServiceServer;
