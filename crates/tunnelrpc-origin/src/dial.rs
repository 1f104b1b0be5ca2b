//! TCP dialing towards an origin

use crate::error::OriginError;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Dial settings shared by every connection to one origin
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    /// Bound on resolving plus connecting; zero means no bound
    pub connect_timeout: Duration,
    /// Idle time before TCP keep-alive packets are sent; zero leaves the OS default
    pub keep_alive: Duration,
    /// Race the second address family after [`FALLBACK_DELAY`] instead of
    /// waiting for every address of the first one to fail
    pub dual_stack: bool,
}

/// Head start given to the first resolved address family
pub const FALLBACK_DELAY: Duration = Duration::from_millis(300);

impl Dialer {
    pub async fn dial(&self, host: &str, port: u16) -> Result<TcpStream, OriginError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let address = format!("{}:{}", host, port);

        if self.connect_timeout.is_zero() {
            return self.connect_any(host, port, &address).await;
        }

        tokio::time::timeout(self.connect_timeout, self.connect_any(host, port, &address))
            .await
            .map_err(|_| OriginError::ConnectTimeout {
                address: address.clone(),
                timeout: self.connect_timeout,
            })?
    }

    async fn connect_any(
        &self,
        host: &str,
        port: u16,
        address: &str,
    ) -> Result<TcpStream, OriginError> {
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| OriginError::ConnectionFailed {
                address: address.to_string(),
                source: e,
            })?
            .collect();

        let Some(first) = candidates.first() else {
            return Err(OriginError::NoAddress(address.to_string()));
        };
        let primary_v4 = first.is_ipv4();
        let (primary, fallback): (Vec<SocketAddr>, Vec<SocketAddr>) = if self.dual_stack {
            candidates.into_iter().partition(|addr| addr.is_ipv4() == primary_v4)
        } else {
            (candidates, Vec::new())
        };

        let connected = if fallback.is_empty() {
            connect_sequential(&primary, address).await
        } else {
            race_families(&primary, &fallback, address).await
        };

        match connected {
            Ok(stream) => {
                self.configure(&stream);
                Ok(stream)
            }
            Err(Some(source)) => Err(OriginError::ConnectionFailed {
                address: address.to_string(),
                source,
            }),
            Err(None) => Err(OriginError::NoAddress(address.to_string())),
        }
    }

    fn configure(&self, stream: &TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        if self.keep_alive.is_zero() {
            return;
        }
        let keepalive = TcpKeepalive::new().with_time(self.keep_alive);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            warn!("Failed to enable TCP keep-alive: {}", e);
        }
    }
}

/// Try each address in order; the error is the last failure, if any
async fn connect_sequential(
    candidates: &[SocketAddr],
    address: &str,
) -> Result<TcpStream, Option<io::Error>> {
    let mut last_error = None;
    for candidate in candidates {
        match TcpStream::connect(candidate).await {
            Ok(stream) => {
                debug!(%address, peer = %candidate, "Connected to origin");
                return Ok(stream);
            }
            Err(e) => {
                debug!(%address, peer = %candidate, "Connect attempt failed: {}", e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error)
}

/// Dial both families, the fallback one starting [`FALLBACK_DELAY`] late
async fn race_families(
    primary: &[SocketAddr],
    fallback: &[SocketAddr],
    address: &str,
) -> Result<TcpStream, Option<io::Error>> {
    let primary_attempt = connect_sequential(primary, address);
    let fallback_attempt = async {
        tokio::time::sleep(FALLBACK_DELAY).await;
        connect_sequential(fallback, address).await
    };
    tokio::pin!(primary_attempt, fallback_attempt);

    let mut primary_error = None;
    let mut fallback_error = None;
    let mut primary_done = false;
    let mut fallback_done = false;

    while !(primary_done && fallback_done) {
        tokio::select! {
            res = &mut primary_attempt, if !primary_done => match res {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    primary_done = true;
                    primary_error = e;
                }
            },
            res = &mut fallback_attempt, if !fallback_done => match res {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    fallback_done = true;
                    fallback_error = e;
                }
            },
        }
    }

    Err(primary_error.or(fallback_error))
}
