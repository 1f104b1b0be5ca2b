//! Agent side of `UseConfiguration`

use crate::applier::ConfigApplier;
use crate::error::RpcError;
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tunnelrpc_proto::{
    decode, encode, ClientConfig, CodecError, Method, RpcCodec, RpcMessage, UseConfigurationResult,
};

const OUTBOUND_BUFFER: usize = 32;

/// Serves `UseConfiguration` calls from the control plane
pub struct ClientServiceServer<A> {
    applier: Arc<A>,
}

impl<A> Clone for ClientServiceServer<A> {
    fn clone(&self) -> Self {
        Self {
            applier: self.applier.clone(),
        }
    }
}

impl<A: ConfigApplier + 'static> ClientServiceServer<A> {
    pub fn new(applier: A) -> Self {
        Self::from_arc(Arc::new(applier))
    }

    pub fn from_arc(applier: Arc<A>) -> Self {
        Self { applier }
    }

    /// Serve calls arriving on one connection until the peer hangs up
    ///
    /// Calls still being applied when the connection drops run to
    /// completion; their results are discarded.
    pub async fn serve<S>(&self, io: S) -> Result<(), RpcError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, mut stream) = Framed::new(io, RpcCodec).split();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        tokio::spawn(write_loop(sink, rx));

        while let Some(frame) = stream.next().await {
            match frame? {
                RpcMessage::Call {
                    call_id,
                    method,
                    params,
                } => self.dispatch(call_id, method, params, &tx).await,
                other => {
                    warn!(
                        call_id = other.call_id(),
                        "Ignoring unexpected message from control plane"
                    );
                }
            }
        }

        debug!("Control plane closed the connection");
        Ok(())
    }

    /// Accept control-plane connections until `shutdown` fires
    pub async fn serve_listener(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), RpcError> {
        info!("Serving UseConfiguration on {}", listener.local_addr()?);

        loop {
            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("UseConfiguration listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };

            if let Err(e) = socket.set_nodelay(true) {
                debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
            }

            let server = self.clone();
            tokio::spawn(async move {
                info!(%peer, "Control plane connected");
                match server.serve(socket).await {
                    Ok(()) => info!(%peer, "Control plane disconnected"),
                    Err(e) => warn!(%peer, "Control plane connection failed: {}", e),
                }
            });
        }
    }

    async fn dispatch(
        &self,
        call_id: u64,
        method: u16,
        params: Vec<u8>,
        tx: &mpsc::Sender<RpcMessage>,
    ) {
        match Method::from_id(method) {
            Some(Method::UseConfiguration) => self.use_configuration(call_id, params, tx).await,
            None => {
                warn!(call_id, method, "Rejecting call to unknown method");
                let reason = format!("unknown method {}", method);
                let _ = tx.send(RpcMessage::Exception { call_id, reason }).await;
            }
        }
    }

    async fn use_configuration(
        &self,
        call_id: u64,
        params: Vec<u8>,
        tx: &mpsc::Sender<RpcMessage>,
    ) {
        let config = match decode::<ClientConfig>(Bytes::from(params)) {
            Ok(config) => config,
            Err(e) => {
                warn!(call_id, error = %e, "Rejecting UseConfiguration with malformed params");
                let reason = format!("Cannot decode ClientConfig: {}", e);
                let _ = tx.send(RpcMessage::Exception { call_id, reason }).await;
                return;
            }
        };

        // Accept before applying so the caller is not blocked on the apply
        if tx.send(RpcMessage::Ack { call_id }).await.is_err() {
            return;
        }
        debug!(call_id, version = %config.version, "Accepted UseConfiguration");

        let applier = self.applier.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = complete_call(applier, call_id, config).await;
            if tx.send(reply).await.is_err() {
                warn!(call_id, "Connection closed before result was delivered");
            }
        });
    }
}

async fn complete_call<A: ConfigApplier + 'static>(
    applier: Arc<A>,
    call_id: u64,
    config: ClientConfig,
) -> RpcMessage {
    let version = config.version;

    // Own task so a panicking applier turns into an exception
    let applied = tokio::spawn(async move {
        let report = applier.apply(&config).await;
        (config, report)
    })
    .await;

    let (config, report) = match applied {
        Ok(applied) => applied,
        Err(e) => {
            error!(call_id, %version, "Applier failed: {}", e);
            return RpcMessage::Exception {
                call_id,
                reason: format!("apply failed: {}", e),
            };
        }
    };

    let built = UseConfigurationResult::from_report(&config, &report)
        .and_then(|result| encode(&result).map(|bytes| (result, bytes)));

    match built {
        Ok((result, bytes)) => {
            info!(
                call_id,
                %version,
                success = result.success,
                failed = result.failed_configs.len(),
                "Applied configuration"
            );
            RpcMessage::Return {
                call_id,
                results: bytes.to_vec(),
            }
        }
        Err(e) => {
            error!(call_id, %version, error = %e, "Cannot encode UseConfiguration result");
            RpcMessage::Exception {
                call_id,
                reason: format!("Cannot encode UseConfigurationResult: {}", e),
            }
        }
    }
}

async fn write_loop<W>(mut sink: W, mut rx: mpsc::Receiver<RpcMessage>)
where
    W: Sink<RpcMessage, Error = CodecError> + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!("Failed to send message to control plane: {}", e);
            break;
        }
    }
}
