//! WebSocket origin connector

use crate::dial::Dialer;
use crate::error::OriginError;
use crate::relay::generate_accept_key;
use crate::stream::OriginStream;
use crate::tls::OriginTls;
use http::header::{HeaderName, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY};
use http::{HeaderMap, HeaderValue};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Response;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;
use tunnelrpc_proto::WebSocketOriginConfig;
use url::Url;

/// Handshake headers the websocket client generates itself
const STRIP_HEADERS: [&str; 5] = [
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// Copy of `headers` without the handshake headers of the inbound upgrade
pub fn strip_websocket_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in STRIP_HEADERS {
        forwarded.remove(HeaderName::from_static(name));
    }
    forwarded
}

/// Live connector for a websocket origin
pub struct WebSocketOriginService {
    url: Url,
    host: String,
    port: u16,
    tls: Option<OriginTls>,
    dialer: Dialer,
}

impl WebSocketOriginService {
    pub fn new(config: &WebSocketOriginConfig) -> Result<Self, OriginError> {
        let mut url = Url::parse(&config.url_string).map_err(|source| OriginError::InvalidUrl {
            url: config.url_string.clone(),
            source,
        })?;

        // The websocket client only speaks ws/wss
        let secure = match url.scheme() {
            "ws" | "http" => false,
            "wss" | "https" => true,
            other => return Err(OriginError::UnsupportedScheme(other.to_string())),
        };
        let scheme = if secure { "wss" } else { "ws" };
        if url.set_scheme(scheme).is_err() {
            return Err(OriginError::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| OriginError::MissingHost(config.url_string.clone()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });

        let tls = if secure {
            Some(OriginTls::new(
                &config.origin_ca_pool,
                config.tls_verify,
                &config.origin_server_name,
                &host,
                std::time::Duration::ZERO,
                Vec::new(),
            )?)
        } else {
            None
        };

        Ok(Self {
            url,
            host,
            port,
            tls,
            dialer: Dialer::default(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Open a websocket to the origin on behalf of an inbound upgrade
    ///
    /// `headers` are the inbound request headers. The handshake ones are
    /// replaced by the client's own. The returned response carries the
    /// `Sec-WebSocket-Accept` value matching the inbound key, ready to be
    /// relayed back to the original caller.
    pub async fn connect(
        &self,
        headers: &HeaderMap,
    ) -> Result<(WebSocketStream<OriginStream>, Response), OriginError> {
        let mut request = self.url.as_str().into_client_request()?;
        for (name, value) in strip_websocket_headers(headers).iter() {
            request.headers_mut().append(name.clone(), value.clone());
        }
        if let Some(host) = headers.get(HOST) {
            request.headers_mut().insert(HOST, host.clone());
        }

        let address = format!("{}:{}", self.host, self.port);
        let tcp = self.dialer.dial(&self.host, self.port).await?;
        let stream = match &self.tls {
            Some(tls) => OriginStream::Tls(Box::new(tls.handshake(tcp, &address).await?)),
            None => OriginStream::Tcp(tcp),
        };

        let (ws, mut response) = tokio_tungstenite::client_async(request, stream).await?;
        debug!(origin = %self.url, status = %response.status(), "Connected to websocket origin");

        if let Some(key) = headers.get(SEC_WEBSOCKET_KEY).and_then(|k| k.to_str().ok()) {
            if let Ok(accept) = HeaderValue::from_str(&generate_accept_key(key)) {
                response.headers_mut().insert(SEC_WEBSOCKET_ACCEPT, accept);
            }
        }

        Ok((ws, response))
    }
}
