//! The low-latency datagram client: a persistent TCP connection carrying
//! length-delimited request/response envelopes and batched pushes, with
//! reconnect-with-backoff modeled on the same reconnect-loop shape used
//! elsewhere in this codebase for long-lived client connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plugin_bus_core::{RequestEnvelope, ResponseEnvelope};
use serde_json::Value;
use tokio::io::ReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::batcher::BatchSink;
use crate::error::{TransportError, TransportResult};
use crate::framing::{read_frame, write_frame};

enum ClientCommand {
    Request {
        envelope: RequestEnvelope,
        respond_to: oneshot::Sender<TransportResult<ResponseEnvelope>>,
    },
    Batch {
        items: Vec<Value>,
    },
}

/// A client for the low-latency transport endpoint. Connects lazily on
/// construction via a background reconnect loop; request/response pairs are
/// correlated by `request_id` over the single multiplexed connection.
#[derive(Clone)]
pub struct LowLatencyClient {
    endpoint: String,
    command_tx: mpsc::UnboundedSender<ClientCommand>,
}

impl LowLatencyClient {
    /// Spawns the background connection loop for `endpoint` (e.g.
    /// `127.0.0.1:9109`, the default TCP loopback endpoint).
    pub fn connect(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_client_loop(endpoint.clone(), command_rx));
        Self {
            endpoint,
            command_tx,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `envelope` and waits up to `per_attempt_timeout` for its
    /// correlated response. Per the protocol's "no fallback on fast path"
    /// rule, a failure here must surface to the caller as a timeout or
    /// transport error, never silently retry on the reliable path.
    pub async fn send_request(
        &self,
        envelope: RequestEnvelope,
        per_attempt_timeout: Duration,
    ) -> TransportResult<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(ClientCommand::Request {
                envelope,
                respond_to: tx,
            })
            .map_err(|_| TransportError::Closed {
                endpoint: self.endpoint.clone(),
            })?;

        match tokio::time::timeout(per_attempt_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed {
                endpoint: self.endpoint.clone(),
            }),
            Err(_) => Err(TransportError::Timeout(per_attempt_timeout.as_secs_f64())),
        }
    }
}

#[async_trait]
impl BatchSink for LowLatencyClient {
    async fn send_batch(&self, items: Vec<Value>) -> TransportResult<()> {
        self.command_tx
            .send(ClientCommand::Batch { items })
            .map_err(|_| TransportError::Closed {
                endpoint: self.endpoint.clone(),
            })
    }
}

async fn run_client_loop(endpoint: String, mut command_rx: mpsc::UnboundedReceiver<ClientCommand>) {
    let mut backoff = Backoff::default();

    loop {
        match TcpStream::connect(&endpoint).await {
            Ok(stream) => {
                info!(endpoint = %endpoint, "low-latency transport connected");
                backoff.reset();
                let stopped = handle_connection(stream, &mut command_rx).await;
                if stopped {
                    return;
                }
                warn!(endpoint = %endpoint, "low-latency transport connection lost; reconnecting");
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "low-latency transport connect failed");
            }
        }

        if command_rx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff.next_delay()).await;
    }
}

/// Drives one TCP connection until it breaks or the client is dropped.
/// Returns `true` if the client was dropped (command channel closed) and
/// the outer loop should stop entirely, `false` if the connection merely
/// broke and a reconnect should be attempted.
async fn handle_connection(
    stream: TcpStream,
    command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
) -> bool {
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let mut pending: HashMap<String, oneshot::Sender<TransportResult<ResponseEnvelope>>> =
        HashMap::new();

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    None => {
                        fail_all_pending(&mut pending, "client dropped");
                        return true;
                    }
                    Some(ClientCommand::Request { envelope, respond_to }) => {
                        let request_id = envelope.request_id.clone();
                        if let Err(err) = write_frame(&mut write_half, &envelope).await {
                            let _ = respond_to.send(Err(err));
                            fail_all_pending(&mut pending, "connection broke while sending");
                            return false;
                        }
                        pending.insert(request_id, respond_to);
                    }
                    Some(ClientCommand::Batch { items }) => {
                        if let Err(err) = write_frame(&mut write_half, &items).await {
                            warn!(error = %err, "failed to write push batch; reconnecting");
                            fail_all_pending(&mut pending, "connection broke while sending batch");
                            return false;
                        }
                    }
                }
            }
            frame = read_frame::<ReadHalf<TcpStream>, ResponseEnvelope>(&mut read_half) => {
                match frame {
                    Ok(Some(response)) => {
                        if let Some(tx) = pending.remove(&response.request_id) {
                            let _ = tx.send(Ok(response));
                        } else {
                            debug!(request_id = %response.request_id, "response for unknown/already-resolved request");
                        }
                    }
                    Ok(None) => {
                        fail_all_pending(&mut pending, "connection closed by peer");
                        return false;
                    }
                    Err(err) => {
                        warn!(error = %err, "low-latency transport read error");
                        fail_all_pending(&mut pending, "connection read error");
                        return false;
                    }
                }
            }
        }
    }
}

fn fail_all_pending(
    pending: &mut HashMap<String, oneshot::Sender<TransportResult<ResponseEnvelope>>>,
    reason: &str,
) {
    for (request_id, tx) in pending.drain() {
        let _ = tx.send(Err(TransportError::SendFailed(format!(
            "{reason} (request {request_id})"
        ))));
    }
}
