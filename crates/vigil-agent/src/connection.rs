//! Connection coordination
//!
//! One task owns each live WebSocket connection. The capability gate has
//! already passed by the time `serve` runs; this module binds the
//! connection to its telemetry sampler, dispatches client messages to the
//! (elevated-only) terminal session, and guarantees the whole set is torn
//! down exactly once when the connection ends, whichever side hung up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use vigil_core::Identity;
use vigil_protocol::{decode_client, encode_server, ClientMessage, ErrorCode, Frame, ServerMessage};

use crate::state::AgentState;
use crate::telemetry::{run_sampler, StatsCollector};
use crate::terminal::{TerminalEvent, TerminalSession};

/// Monotonic connection counter, for log correlation only
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Bounded wait for the sampler task during teardown
const TEARDOWN_WAIT: Duration = Duration::from_millis(500);

/// Per-connection dispatch state: the identity that passed the gate and
/// the connection's single (possible) terminal session.
struct ConnectionActor {
    id: u64,
    identity: Identity,
    terminal: TerminalSession,
    outbound_tx: mpsc::Sender<ServerMessage>,
}

impl ConnectionActor {
    async fn handle_client_message(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::TerminalSpawn => {
                if !self.identity.role.is_elevated() {
                    tracing::warn!(
                        "Connection {}: restricted identity {} requested a terminal",
                        self.id,
                        self.identity.subject
                    );
                    Self::send_error(
                        &self.outbound_tx,
                        ErrorCode::Unauthorized,
                        "Terminal access requires an elevated role".to_string(),
                    )
                    .await;
                    return;
                }
                if let Err(e) = self.terminal.spawn() {
                    Self::send_error(&self.outbound_tx, ErrorCode::SpawnFailed, e.to_string()).await;
                }
            }
            ClientMessage::TerminalInput(data) => {
                if !self.identity.role.is_elevated() {
                    tracing::trace!("Connection {}: dropping input from restricted role", self.id);
                    return;
                }
                if let Err(e) = self.terminal.write(&data) {
                    tracing::warn!("Connection {}: terminal write failed: {}", self.id, e);
                }
            }
            ClientMessage::TerminalResize(size) => {
                if !self.identity.role.is_elevated() {
                    return;
                }
                if let Err(e) = self.terminal.resize(size) {
                    tracing::warn!("Connection {}: terminal resize failed: {}", self.id, e);
                }
            }
        }
    }

    // Takes the sender rather than `&self`: `ConnectionActor` is not `Sync`
    // (the terminal owns non-`Sync` PTY handles), so holding `&self` across
    // the await would make the returned future non-`Send`. Borrowing only
    // the `Sender` (which is `Sync`) keeps the future `Send`.
    async fn send_error(
        outbound_tx: &mpsc::Sender<ServerMessage>,
        code: ErrorCode,
        message: String,
    ) {
        let _ = outbound_tx
            .send(ServerMessage::Error { code, message })
            .await;
    }
}

/// Serve one authenticated WebSocket connection until either side ends it
pub async fn serve(socket: WebSocket, identity: Identity, state: Arc<AgentState>) {
    let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        "Connection {} established for {} (role {})",
        id,
        identity.subject,
        identity.role
    );

    let cancel = CancellationToken::new();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(256);
    let (terminal_tx, mut terminal_rx) = mpsc::channel::<TerminalEvent>(256);

    // Telemetry streams for every role
    let sampler = tokio::spawn(run_sampler(
        StatsCollector::new(),
        state.config.telemetry.interval,
        cancel.clone(),
        outbound_tx.clone(),
    ));

    let mut actor = ConnectionActor {
        id,
        identity,
        terminal: TerminalSession::new(state.config.terminal.clone(), terminal_tx),
        outbound_tx,
    };

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(ws_msg)) => {
                        let frame = match ws_msg {
                            Message::Text(text) => Frame::Text(text),
                            Message::Binary(data) => Frame::Binary(Bytes::from(data)),
                            // Ping/pong are answered by the transport
                            _ => continue,
                        };
                        match decode_client(frame) {
                            Ok(msg) => actor.handle_client_message(msg).await,
                            Err(e) => {
                                tracing::debug!("Connection {}: rejected frame: {}", id, e);
                                ConnectionActor::send_error(
                                    &actor.outbound_tx,
                                    ErrorCode::InvalidMessage,
                                    e.to_string(),
                                )
                                .await;
                            }
                        }
                    }
                }
            }
            Some(msg) = outbound_rx.recv() => {
                if forward(&mut ws_tx, &msg).await.is_err() {
                    break;
                }
            }
            Some(event) = terminal_rx.recv() => {
                let msg = match event {
                    TerminalEvent::Output(chunk) => ServerMessage::TerminalOutput(chunk),
                    TerminalEvent::Exited { generation } => {
                        match actor.terminal.reap(generation) {
                            Some(exit_code) => ServerMessage::TerminalExit { exit_code },
                            // Stale event from a replaced shell
                            None => continue,
                        }
                    }
                };
                if forward(&mut ws_tx, &msg).await.is_err() {
                    break;
                }
            }
        }
    }

    // Teardown runs exactly once, at the single exit of the loop above:
    // cancel the sampler, kill the shell, reclaim the connection's tasks.
    cancel.cancel();
    actor.terminal.terminate();
    if timeout(TEARDOWN_WAIT, sampler).await.is_err() {
        tracing::warn!("Connection {}: sampler did not stop within {:?}", id, TEARDOWN_WAIT);
    }
    tracing::info!("Connection {} closed", id);
}

async fn forward(
    ws_tx: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let frame = match encode_server(msg) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Failed to encode server message: {}", e);
            return Ok(());
        }
    };
    let ws_msg = match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data.to_vec()),
    };
    ws_tx.send(ws_msg).await
}
