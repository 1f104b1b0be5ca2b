//! HTTP origin connector
//!
//! Sends HTTP/1.1 requests to the origin through hyper. Connections are
//! reused when the previous exchange on them has finished:
//! - idle connections are capped at `max_idle_connections`
//! - a connection idle for longer than `idle_connection_timeout` is dropped

use crate::dial::Dialer;
use crate::error::OriginError;
use crate::stream::OriginStream;
use crate::tls::OriginTls;
use bytes::Bytes;
use http::header::{HOST, TRANSFER_ENCODING};
use http::uri::PathAndQuery;
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use tunnelrpc_proto::HttpOriginConfig;
use url::Url;

/// Idle connection cap used when the config leaves it at zero
const DEFAULT_MAX_IDLE: usize = 100;

enum Target {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

/// Connection pool entry
struct PooledConnection {
    sender: http1::SendRequest<Full<Bytes>>,
    idle_since: Instant,
}

/// Live connector for an HTTP origin
///
/// `expect_continue_timeout` has no effect here: request bodies are fully
/// buffered and hyper's HTTP/1 client sends them without waiting for
/// `100 Continue`.
pub struct HttpOriginService {
    url: Url,
    target: Target,
    dialer: Dialer,
    tls: Option<OriginTls>,
    chunked_encoding: bool,
    max_idle: usize,
    idle_timeout: Duration,
    pool: Arc<Mutex<Vec<PooledConnection>>>,
}

impl HttpOriginService {
    pub fn new(config: &HttpOriginConfig) -> Result<Self, OriginError> {
        let url = Url::parse(&config.url_string).map_err(|source| OriginError::InvalidUrl {
            url: config.url_string.clone(),
            source,
        })?;

        let (target, tls) = match url.scheme() {
            "unix" => {
                // unix://<path> or unix:<path>
                let path = match url.host_str() {
                    Some(host) if !host.is_empty() => format!("{}{}", host, url.path()),
                    _ => url.path().to_string(),
                };
                (Target::Unix(PathBuf::from(path)), None)
            }
            scheme @ ("http" | "https") => {
                let host = url
                    .host_str()
                    .ok_or_else(|| OriginError::MissingHost(config.url_string.clone()))?
                    .to_string();
                let port = url.port_or_known_default().unwrap_or(80);
                let tls = if scheme == "https" {
                    Some(OriginTls::new(
                        &config.origin_ca_pool,
                        // true means verify
                        config.tls_verify,
                        &config.origin_server_name,
                        &host,
                        config.tls_handshake_timeout,
                        vec![b"http/1.1".to_vec()],
                    )?)
                } else {
                    None
                };
                (Target::Tcp { host, port }, tls)
            }
            other => return Err(OriginError::UnsupportedScheme(other.to_string())),
        };

        let max_idle = match usize::try_from(config.max_idle_connections) {
            Ok(0) | Err(_) => DEFAULT_MAX_IDLE,
            Ok(n) => n,
        };

        Ok(Self {
            url,
            target,
            dialer: Dialer {
                connect_timeout: config.proxy_connection_timeout,
                keep_alive: config.tcp_keep_alive,
                dual_stack: config.dial_dual_stack,
            },
            tls,
            chunked_encoding: config.chunked_encoding,
            max_idle,
            idle_timeout: config.idle_connection_timeout,
            pool: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Send one request to the origin and return its response
    ///
    /// Only the path and query of the request URI are used; the origin URL
    /// decides where the request goes. The request's `Host` header is kept
    /// and filled in from the origin URL when absent.
    pub async fn round_trip(
        &self,
        mut request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, OriginError> {
        let path = request
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        *request.uri_mut() = Uri::builder().path_and_query(path).build()?;

        if !request.headers().contains_key(HOST) {
            if let Ok(host) = HeaderValue::from_str(&self.authority()) {
                request.headers_mut().insert(HOST, host);
            }
        }
        if !self.chunked_encoding {
            // Full bodies have a known length; let hyper send Content-Length
            request.headers_mut().remove(TRANSFER_ENCODING);
        }

        let mut sender = self.get_connection().await?;
        debug!(
            origin = %self.url,
            method = %request.method(),
            path = %request.uri(),
            "Forwarding request to origin"
        );
        let response = sender.send_request(request).await?;
        self.return_connection(sender);

        Ok(response)
    }

    fn authority(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => "localhost".to_string(),
        }
    }

    /// Get a pooled connection or dial a new one
    async fn get_connection(&self) -> Result<http1::SendRequest<Full<Bytes>>, OriginError> {
        {
            let mut pool = self.pool.lock().await;
            while let Some(conn) = pool.pop() {
                let expired =
                    !self.idle_timeout.is_zero() && conn.idle_since.elapsed() > self.idle_timeout;
                if conn.sender.is_ready() && !expired {
                    debug!("Reusing pooled connection to {}", self.url);
                    return Ok(conn.sender);
                }
                debug!("Discarding stale connection from pool");
            }
        }

        let stream = self.connect().await?;
        let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;

        // Spawn connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Origin connection closed: {}", e);
            }
        });

        Ok(sender)
    }

    /// Pool the connection once its current exchange, response body
    /// included, has finished
    fn return_connection(&self, mut sender: http1::SendRequest<Full<Bytes>>) {
        let pool = self.pool.clone();
        let max_idle = self.max_idle;
        tokio::spawn(async move {
            if sender.ready().await.is_err() {
                return;
            }

            let mut pool = pool.lock().await;
            if pool.len() < max_idle {
                pool.push(PooledConnection {
                    sender,
                    idle_since: Instant::now(),
                });
            }
        });
    }

    /// Connections waiting in the pool
    pub async fn idle_connections(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Open a fresh byte stream to the origin
    pub async fn connect(&self) -> Result<OriginStream, OriginError> {
        match &self.target {
            Target::Tcp { host, port } => {
                let tcp = self.dialer.dial(host, *port).await?;
                match &self.tls {
                    Some(tls) => {
                        let address = format!("{}:{}", host, port);
                        let stream = tls.handshake(tcp, &address).await?;
                        Ok(OriginStream::Tls(Box::new(stream)))
                    }
                    None => Ok(OriginStream::Tcp(tcp)),
                }
            }
            Target::Unix(path) => connect_unix(path).await,
        }
    }
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path) -> Result<OriginStream, OriginError> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|source| OriginError::ConnectionFailed {
            address: path.display().to_string(),
            source,
        })?;
    Ok(OriginStream::Unix(stream))
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path) -> Result<OriginStream, OriginError> {
    Err(OriginError::UnsupportedScheme("unix".to_string()))
}
