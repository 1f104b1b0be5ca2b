//! Control-plane side of `UseConfiguration`

use crate::error::RpcError;
use crate::pending::{PendingCalls, Reply};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunnelrpc_proto::{
    decode, encode, ClientConfig, CodecError, Method, RpcCodec, RpcMessage, UseConfigurationResult,
};

/// Client behaviour knobs
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Upper bound on one `use_configuration` call; `None` waits forever
    pub call_timeout: Option<Duration>,
    /// Outbound messages queued before callers start waiting
    pub outbound_buffer: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(60)),
            outbound_buffer: 32,
        }
    }
}

/// Caller of the agent's `UseConfiguration` method
///
/// One client owns one connection. Any number of calls may be in flight;
/// replies are matched to callers by call id.
pub struct ClientServiceClient {
    outbound: mpsc::Sender<RpcMessage>,
    pending: PendingCalls,
    next_call_id: AtomicU64,
    settings: ClientSettings,
    closed: CancellationToken,
}

impl ClientServiceClient {
    pub fn new<S>(io: S, settings: ClientSettings) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, stream) = Framed::new(io, RpcCodec).split();
        let (outbound, rx) = mpsc::channel(settings.outbound_buffer.max(1));
        let pending = PendingCalls::new();
        let closed = CancellationToken::new();

        tokio::spawn(write_loop(sink, rx));
        tokio::spawn(read_loop(stream, pending.clone(), closed.clone()));

        Self {
            outbound,
            pending,
            next_call_id: AtomicU64::new(1),
            settings,
            closed,
        }
    }

    /// Number of calls still waiting for a reply
    pub fn in_flight(&self) -> usize {
        self.pending.count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Push a configuration and wait for the agent's verdict
    ///
    /// Cancelling `cancel` or hitting the call timeout abandons the call
    /// locally; a reply arriving afterwards is discarded.
    pub async fn use_configuration(
        &self,
        cancel: &CancellationToken,
        config: &ClientConfig,
    ) -> Result<UseConfigurationResult, RpcError> {
        if cancel.is_cancelled() {
            return Err(RpcError::Cancelled);
        }

        // Queueing the call counts against the timeout too: a stalled writer
        // must not hold the caller past its deadline
        let exchange = async {
            let call = self.start_use_configuration(config).await?;
            let call_id = call.call_id();
            let result = call.result().await;
            if let Ok(result) = &result {
                debug!(
                    call_id,
                    success = result.success,
                    failed = result.failed_configs.len(),
                    "UseConfiguration completed"
                );
            }
            result
        };

        let call_timeout = self.settings.call_timeout;
        let bounded = async move {
            match call_timeout {
                Some(limit) => match tokio::time::timeout(limit, exchange).await {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::Timeout(limit)),
                },
                None => exchange.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            result = bounded => result,
        };

        if let Err(e) = &result {
            warn!(version = %config.version, error = %e, "UseConfiguration failed");
        }
        result
    }

    /// Send the call and return a handle resolving in two stages:
    /// [`PendingConfiguration::accepted`] and then
    /// [`PendingConfiguration::result`]
    pub async fn start_use_configuration(
        &self,
        config: &ClientConfig,
    ) -> Result<PendingConfiguration, RpcError> {
        let params = encode(config)?;
        if self.closed.is_cancelled() {
            return Err(RpcError::ConnectionClosed);
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (ack, reply) = self.pending.register(call_id);
        // Dropping the handle deregisters the call, including on send failure
        let call = PendingConfiguration {
            call_id,
            ack: Some(ack),
            reply,
            completed: None,
            pending: self.pending.clone(),
            closed: self.closed.clone(),
        };

        let message = RpcMessage::Call {
            call_id,
            method: Method::UseConfiguration.id(),
            params: params.to_vec(),
        };
        tokio::select! {
            sent = self.outbound.send(message) => sent.map_err(|_| RpcError::ConnectionClosed)?,
            _ = self.closed.cancelled() => return Err(RpcError::ConnectionClosed),
        }

        debug!(call_id, version = %config.version, "Sent UseConfiguration call");
        Ok(call)
    }
}

impl Drop for ClientServiceClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// An in-flight `UseConfiguration` call
pub struct PendingConfiguration {
    call_id: u64,
    ack: Option<oneshot::Receiver<()>>,
    reply: oneshot::Receiver<Reply>,
    completed: Option<Result<Reply, RpcError>>,
    pending: PendingCalls,
    closed: CancellationToken,
}

impl PendingConfiguration {
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Resolves once the agent has accepted the call, before it applies
    /// anything. Fails with the agent's exception if it rejected the call.
    pub async fn accepted(&mut self) -> Result<(), RpcError> {
        let Some(ack) = self.ack.as_mut() else {
            return Ok(());
        };

        let acknowledged = tokio::select! {
            res = ack => res.is_ok(),
            _ = self.closed.cancelled() => return Err(RpcError::ConnectionClosed),
        };
        self.ack = None;
        if acknowledged {
            return Ok(());
        }

        // The call finished without an acknowledgement
        let reply = self.wait_reply().await;
        let outcome = match &reply {
            Ok(Reply::Results(_)) => Ok(()),
            Ok(Reply::Exception(reason)) => Err(RpcError::Remote(reason.clone())),
            Err(_) => Err(RpcError::ConnectionClosed),
        };
        self.completed = Some(reply);
        outcome
    }

    /// Wait for the agent's verdict
    pub async fn result(mut self) -> Result<UseConfigurationResult, RpcError> {
        let reply = match self.completed.take() {
            Some(reply) => reply,
            None => self.wait_reply().await,
        };

        match reply? {
            Reply::Results(bytes) => Ok(decode::<UseConfigurationResult>(Bytes::from(bytes))?),
            Reply::Exception(reason) => Err(RpcError::Remote(reason)),
        }
    }

    async fn wait_reply(&mut self) -> Result<Reply, RpcError> {
        tokio::select! {
            res = &mut self.reply => res.map_err(|_| RpcError::ConnectionClosed),
            _ = self.closed.cancelled() => Err(RpcError::ConnectionClosed),
        }
    }
}

impl Drop for PendingConfiguration {
    fn drop(&mut self) {
        self.pending.cancel(self.call_id);
    }
}

async fn write_loop<W>(mut sink: W, mut rx: mpsc::Receiver<RpcMessage>)
where
    W: Sink<RpcMessage, Error = CodecError> + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!("Failed to send message to agent: {}", e);
            break;
        }
    }
    debug!("Client writer stopped");
}

async fn read_loop<R>(mut stream: R, pending: PendingCalls, closed: CancellationToken)
where
    R: Stream<Item = Result<RpcMessage, CodecError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(RpcMessage::Ack { call_id })) => {
                pending.acknowledge(call_id);
            }
            Some(Ok(RpcMessage::Return { call_id, results })) => {
                pending.respond(call_id, Reply::Results(results));
            }
            Some(Ok(RpcMessage::Exception { call_id, reason })) => {
                debug!(call_id, %reason, "Agent raised exception");
                pending.respond(call_id, Reply::Exception(reason));
            }
            Some(Ok(RpcMessage::Call { call_id, .. })) => {
                warn!(call_id, "Ignoring call initiated by agent");
            }
            Some(Err(e)) => {
                warn!("Failed to read from agent: {}", e);
                break;
            }
            None => {
                info!("Agent closed the connection");
                break;
            }
        }
    }

    closed.cancel();
    pending.fail_all();
}
