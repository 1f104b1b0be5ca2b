//! Building live connectors from origin descriptors

use crate::error::OriginError;
use crate::http::HttpOriginService;
use crate::websocket::WebSocketOriginService;
use tunnelrpc_proto::{
    HelloWorldOriginConfig, HttpOriginConfig, Origin, OriginKind, WebSocketOriginConfig,
};
use url::Url;

/// A connector ready to reach one origin
pub enum OriginService {
    Http(HttpOriginService),
    WebSocket(WebSocketOriginService),
}

impl OriginService {
    pub fn kind(&self) -> OriginKind {
        match self {
            OriginService::Http(_) => OriginKind::Http,
            OriginService::WebSocket(_) => OriginKind::WebSocket,
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            OriginService::Http(service) => service.url(),
            OriginService::WebSocket(service) => service.url(),
        }
    }
}

/// Produces the live connector described by an origin config
///
/// Building validates the descriptor (URL, CA pool, server name) without
/// touching the network.
pub trait BuildOriginService {
    fn service(&self) -> Result<OriginService, OriginError>;
}

impl BuildOriginService for Origin {
    fn service(&self) -> Result<OriginService, OriginError> {
        match self {
            Origin::Http(config) => config.service(),
            Origin::WebSocket(config) => config.service(),
            Origin::HelloWorld(config) => config.service(),
        }
    }
}

impl BuildOriginService for HttpOriginConfig {
    fn service(&self) -> Result<OriginService, OriginError> {
        Ok(OriginService::Http(HttpOriginService::new(self)?))
    }
}

impl BuildOriginService for WebSocketOriginConfig {
    fn service(&self) -> Result<OriginService, OriginError> {
        Ok(OriginService::WebSocket(WebSocketOriginService::new(self)?))
    }
}

impl BuildOriginService for HelloWorldOriginConfig {
    fn service(&self) -> Result<OriginService, OriginError> {
        Err(OriginError::NotImplemented)
    }
}
