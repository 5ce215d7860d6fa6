//! WebSocket ingress.
//!
//! Each connection is validated before the upgrade, registered while
//! open, and deregistered on any close path. Inbound binary frames are
//! relayed to the audio topic fire-and-forget; a publish failure drops
//! the frame, never the connection. The downstream half of the socket
//! is fed by a writer task draining the registry's outbound queue.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::{AudioFrameMessage, SessionEndedMessage, SessionStartedMessage};
use crate::gateway::registry::{ConnectionHandle, ConnectionRole, OutboundMessage};
use crate::gateway::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub participant: Option<String>,
    pub role: Option<String>,
}

fn valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// GET /ws/:session_id?participant=...&role=...
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Result<Response, StatusCode> {
    if !valid_session_id(&session_id) {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Fail closed: a validation error is indistinguishable from an
    // invalid session.
    match state.validator.validate(&session_id).await {
        Ok(true) => {}
        Ok(false) => {
            info!("Rejecting connection for invalid session {}", session_id);
            return Err(StatusCode::UNAUTHORIZED);
        }
        Err(e) => {
            warn!("Session validation failed for {}: {}", session_id, e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let participant_id = query
        .participant
        .unwrap_or_else(|| format!("conn-{}", uuid::Uuid::new_v4()));
    let role = match query.role.as_deref() {
        Some("host") => ConnectionRole::Host,
        _ => ConnectionRole::Participant,
    };

    // The socket limit sits above the application limit so an oversized
    // frame is dropped in the read loop instead of killing the socket.
    let socket_limit = state.settings.max_frame_bytes.saturating_mul(2).max(64 * 1024);
    Ok(ws
        .max_frame_size(socket_limit)
        .max_message_size(socket_limit)
        .on_upgrade(move |socket| handle_socket(socket, state, session_id, participant_id, role)))
}

async fn handle_socket(
    socket: WebSocket,
    state: GatewayState,
    session_id: String,
    participant_id: String,
    role: ConnectionRole,
) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(64);

    // Writer task: sole owner of the socket sink. It exits when every
    // outbound handle is gone or the peer stops accepting.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match message {
                OutboundMessage::Text(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundMessage::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let handle = ConnectionHandle {
        participant_id: participant_id.clone(),
        role,
        connected_at: chrono::Utc::now().timestamp_millis(),
        outbound: outbound_tx,
    };
    let is_new = state.registry.add_connection(&session_id, handle);
    info!(
        "Connection {} joined session {} as {:?}",
        participant_id, session_id, role
    );

    if is_new {
        let started = SessionStartedMessage {
            session_id: session_id.clone(),
            ts: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = state.events.session_started(&started).await {
            warn!("Failed to publish session start for {}: {}", session_id, e);
        }
    }

    let idle = Duration::from_millis(state.settings.idle_timeout_ms);
    loop {
        let message = match tokio::time::timeout(idle, receiver.next()).await {
            Err(_) => {
                info!(
                    "Closing idle connection {} in session {}",
                    participant_id, session_id
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(
                    "WebSocket error on connection {} in session {}: {}",
                    participant_id, session_id, e
                );
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Binary(frame) => {
                if frame.len() > state.settings.max_frame_bytes {
                    warn!(
                        "Dropping oversized frame ({} bytes) from {} in session {}",
                        frame.len(),
                        participant_id,
                        session_id
                    );
                    continue;
                }

                let envelope = AudioFrameMessage::new(&session_id, &participant_id, &frame);
                if let Err(e) = state.events.audio_frame(&envelope).await {
                    // Fire-and-forget: a lost frame beats a stalled
                    // stream.
                    warn!("Failed to publish audio frame for session {}: {}", session_id, e);
                }
            }
            Message::Close(_) => break,
            // Audio is binary only.
            Message::Text(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    if let Some(closed) = state.registry.remove_connection(&session_id, &participant_id) {
        let now = chrono::Utc::now().timestamp_millis();
        let ended = SessionEndedMessage {
            session_id: session_id.clone(),
            ts: now,
            duration: (now - closed.started_at).max(0) as u64,
        };
        if let Err(e) = state.events.session_ended(&ended).await {
            warn!("Failed to publish session end for {}: {}", session_id, e);
        }
        info!("Session {} ended after {} ms", session_id, ended.duration);
    }
    info!("Connection {} left session {}", participant_id, session_id);

    // Every teardown path above drops the registry's outbound sender, so
    // the writer drains whatever is queued and exits.
    let _ = writer.await;
}
