//! Byte relays between an accepted connection and an origin

use crate::error::OriginError;
use futures_util::{Sink, SinkExt, StreamExt};
use http::header::{CONNECTION, UPGRADE};
use http::HeaderMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time allowed to write one message to the websocket peer
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between two messages (pongs included) from the websocket peer
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period, kept below [`PONG_WAIT`]
pub const PING_PERIOD: Duration = Duration::from_secs(54);

const RELAY_BUFFER_SIZE: usize = 32 * 1024;

/// Copy bytes both ways until either side closes
///
/// Returns as soon as one direction reaches EOF or fails; the other
/// direction is abandoned. Returns (bytes_to_remote, bytes_to_local) with
/// the unfinished direction counted up to that point.
pub async fn relay<L, R>(local: &mut L, remote: &mut R) -> io::Result<(u64, u64)>
where
    L: AsyncRead + AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let (mut local_reader, mut local_writer) = tokio::io::split(local);
    let (mut remote_reader, mut remote_writer) = tokio::io::split(remote);

    let mut to_remote = 0u64;
    let mut to_local = 0u64;

    let outcome = tokio::select! {
        res = copy_counted(&mut local_reader, &mut remote_writer, &mut to_remote) => {
            debug!("Local side closed");
            res
        }
        res = copy_counted(&mut remote_reader, &mut local_writer, &mut to_local) => {
            debug!("Remote side closed");
            res
        }
    };

    let _ = remote_writer.shutdown().await;
    let _ = local_writer.shutdown().await;
    outcome?;

    debug!(
        bytes_to_remote = to_remote,
        bytes_to_local = to_local,
        "Relay completed"
    );
    Ok((to_remote, to_local))
}

async fn copy_counted<Rd, Wr>(reader: &mut Rd, writer: &mut Wr, copied: &mut u64) -> io::Result<()>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}

/// Whether the request headers ask for a websocket upgrade
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false)
    });
    let upgrade_websocket = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_upgrade && upgrade_websocket
}

/// Value of `Sec-WebSocket-Accept` answering `key`
pub fn generate_accept_key(key: &str) -> String {
    derive_accept_key(key.as_bytes())
}

/// Run the server side of the websocket handshake on an accepted stream
pub async fn accept_upgrade<S>(stream: S) -> Result<WebSocketStream<S>, OriginError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Ok(tokio_tungstenite::accept_async(stream).await?)
}

/// Pump websocket messages to and from a byte stream
///
/// Binary and text payloads are written to `stream`; bytes read from
/// `stream` go out as binary messages. The peer is pinged every
/// [`PING_PERIOD`] and dropped when silent for longer than [`PONG_WAIT`].
///
/// Returns (bytes_to_stream, bytes_to_websocket)
pub async fn relay_websocket<W, S>(
    ws: WebSocketStream<W>,
    stream: S,
) -> Result<(u64, u64), OriginError>
where
    W: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sink, mut ws_stream) = ws.split();
    let (mut reader, mut writer) = tokio::io::split(stream);

    let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    let mut last_seen = Instant::now();
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut to_stream = 0u64;
    let mut to_ws = 0u64;

    loop {
        tokio::select! {
            message = ws_stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    last_seen = Instant::now();
                    writer.write_all(&data).await?;
                    to_stream += data.len() as u64;
                }
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    writer.write_all(text.as_bytes()).await?;
                    to_stream += text.len() as u64;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket peer closed");
                    break;
                }
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => return Err(e.into()),
            },
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    debug!("Stream closed, closing websocket");
                    let _ = send_with_deadline(&mut ws_sink, Message::Close(None)).await;
                    break;
                }
                send_with_deadline(&mut ws_sink, Message::Binary(buf[..n].to_vec())).await?;
                to_ws += n as u64;
            }
            _ = ping.tick() => {
                if last_seen.elapsed() > PONG_WAIT {
                    warn!("WebSocket peer silent for {:?}, dropping", PONG_WAIT);
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "websocket peer stopped answering pings").into());
                }
                send_with_deadline(&mut ws_sink, Message::Ping(Vec::new())).await?;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Failed to shut down stream: {}", e);
    }
    Ok((to_stream, to_ws))
}

async fn send_with_deadline<K>(sink: &mut K, message: Message) -> Result<(), OriginError>
where
    K: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "websocket write timed out").into()),
    }
}

/// Accepts websocket connections and relays each one to a fixed TCP address
pub struct WebSocketProxyServer {
    listener: TcpListener,
    remote: String,
}

impl WebSocketProxyServer {
    pub fn new(listener: TcpListener, remote: impl Into<String>) -> Self {
        Self {
            listener,
            remote: remote.into(),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), OriginError> {
        info!(
            "WebSocket proxy listening on {}, forwarding to {}",
            self.listener.local_addr()?,
            self.remote
        );

        loop {
            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("WebSocket proxy shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };

            let remote = self.remote.clone();
            tokio::spawn(async move {
                if let Err(e) = proxy_connection(socket, &remote).await {
                    warn!(%peer, "WebSocket proxy connection failed: {}", e);
                }
            });
        }
    }
}

async fn proxy_connection(socket: TcpStream, remote: &str) -> Result<(), OriginError> {
    let ws = accept_upgrade(socket).await?;

    let backend = match TcpStream::connect(remote).await {
        Ok(stream) => stream,
        Err(source) => {
            error!(%remote, "Cannot connect to remote: {}", source);
            return Err(OriginError::ConnectionFailed {
                address: remote.to_string(),
                source,
            });
        }
    };

    let (to_remote, to_client) = relay_websocket(ws, backend).await?;
    debug!(
        %remote,
        bytes_to_remote = to_remote,
        bytes_to_client = to_client,
        "WebSocket proxy connection finished"
    );
    Ok(())
}
