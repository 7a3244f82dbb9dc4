//! WebSocket Connection Actor
//!
//! One actor per accepted socket: a reader loop (this task), a writer
//! task draining the connection's mpsc channel, and a liveness task.
//! The reader owns the session state machine; everything else delivers
//! frames by cloning the channel sender.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;
use crate::registry::EnvelopeSender;
use crate::state::AppState;

use super::liveness::{IdleTracker, liveness_task};
use super::protocol::{ClientEnvelope, ClientFrame, ConnectionId, ServerEnvelope, UserId};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, handshake not completed. Only auth and heartbeat
    /// frames are meaningful here.
    Open,
    /// Bound to a user; chat frames accepted.
    Authenticated(UserId),
    /// Teardown underway; the reader loop exits on seeing this.
    Closing,
}

impl SessionState {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Authenticated(user_id) => Some(*user_id),
            _ => None,
        }
    }
}

/// Runs one connection to completion. Cleanup is unconditional:
/// whatever path ends the reader loop, the tasks are cancelled and the
/// registry entry is removed exactly once.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let conn_id = ConnectionId::new_v4();
    info!(%conn_id, "new websocket connection");
    state.metrics.connection_opened();

    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<ServerEnvelope>();
    let idle = Arc::new(IdleTracker::new());
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(writer_task(ws_sender, rx, idle.clone()));
    let liveness = tokio::spawn(liveness_task(
        conn_id,
        idle.clone(),
        tx.clone(),
        cancel.clone(),
        state.config.liveness.clone(),
    ));

    read_loop(ws_receiver, conn_id, &tx, idle, &state, &cancel).await;

    cancel.cancel();
    // Deregister drops the registry's sender clone; with ours dropped
    // below, the writer drains its queue and exits.
    if let Some(user_id) = state.registry.deregister(conn_id) {
        debug!(%conn_id, user_id, "session ended");
    }
    drop(tx);
    let _ = liveness.await;
    let _ = writer.await;
    state.metrics.connection_closed();
    info!(%conn_id, "websocket connection closed");
}

/// Serializes envelopes onto the socket and stamps write activity.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerEnvelope>,
    idle: Arc<IdleTracker>,
) {
    while let Some(envelope) = rx.recv().await {
        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(err) => {
                error!("failed to serialize envelope: {}", err);
                continue;
            }
        };
        if ws_sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
        idle.touch_write();
    }
    let _ = ws_sender.close().await;
}

async fn read_loop<S>(
    mut ws_receiver: S,
    conn_id: ConnectionId,
    tx: &EnvelopeSender,
    idle: Arc<IdleTracker>,
    state: &AppState,
    cancel: &CancellationToken,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut session = SessionState::Open;
    let auth_deadline = tokio::time::Instant::now() + state.config.handshake_timeout;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(auth_deadline),
                if session == SessionState::Open =>
            {
                warn!(%conn_id, "authentication handshake timed out");
                let _ = tx.send(GatewayError::Unauthenticated.to_envelope());
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        match frame {
            None => break,
            Some(Err(err)) => {
                debug!(%conn_id, "websocket transport error: {}", err);
                break;
            }
            Some(Ok(Message::Text(text))) => {
                idle.touch_read();
                state.metrics.message_received();
                session = handle_text(text.as_str(), session, conn_id, tx, state).await;
                if session == SessionState::Closing {
                    break;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                idle.touch_read();
                state.metrics.protocol_error();
                let _ = tx.send(
                    GatewayError::Protocol("binary frames not supported".into()).to_envelope(),
                );
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => idle.touch_read(),
            Some(Ok(Message::Close(_))) => {
                debug!(%conn_id, "client closed connection");
                break;
            }
        }
    }
}

/// Processes one text frame and returns the next session state.
async fn handle_text(
    text: &str,
    session: SessionState,
    conn_id: ConnectionId,
    tx: &EnvelopeSender,
    state: &AppState,
) -> SessionState {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            state.metrics.protocol_error();
            let _ = tx
                .send(GatewayError::Protocol(format!("malformed frame: {err}")).to_envelope());
            return session;
        }
    };

    match envelope.frame {
        ClientFrame::Heartbeat => {
            let _ = tx.send(ServerEnvelope::heartbeat_response());
            session
        }
        ClientFrame::Auth(payload) => handle_auth(&payload.token, session, conn_id, tx, state),
        ClientFrame::Chat(payload) => {
            let SessionState::Authenticated(user_id) = session else {
                state.metrics.protocol_error();
                let _ = tx.send(GatewayError::Unauthenticated.to_envelope());
                return session;
            };
            if let Err(err) = state.router.route(user_id, conn_id, payload, tx).await {
                let _ = tx.send(err.to_envelope());
                if err.is_fatal() {
                    return SessionState::Closing;
                }
            }
            session
        }
    }
}

fn handle_auth(
    token: &str,
    session: SessionState,
    conn_id: ConnectionId,
    tx: &EnvelopeSender,
    state: &AppState,
) -> SessionState {
    if matches!(session, SessionState::Authenticated(_)) {
        state.metrics.protocol_error();
        let _ = tx.send(GatewayError::Protocol("already authenticated".into()).to_envelope());
        return session;
    }

    match state.validator.validate(token) {
        Ok(user_id) => {
            state.registry.register(user_id, conn_id, tx.clone());
            let _ = tx.send(ServerEnvelope::auth_success(user_id));
            info!(%conn_id, user_id, "authenticated");
            SessionState::Authenticated(user_id)
        }
        Err(err) => {
            state.metrics.auth_failure();
            warn!(%conn_id, "authentication failed: {}", err);
            // Recoverable: the client may retry with a fresh token on
            // the same connection, until the handshake deadline.
            let _ = tx.send(GatewayError::Auth(err).to_envelope());
            session
        }
    }
}
