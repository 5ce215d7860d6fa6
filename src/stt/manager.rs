//! STT session manager.
//!
//! Owns one provider connection actor per session, capped in count, and
//! the bus loop wiring audio in and transcript events out.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bus::{
    AudioFrameMessage, BusClient, SessionEndedMessage, SessionStartedMessage, Topics,
    TranscriptEventMessage,
};
use crate::stt::connection::{ConnectionConfig, ConnectionState, ProviderConnection};
use crate::stt::provider::SttProvider;

#[derive(Debug, Clone)]
pub struct SttManagerConfig {
    /// Concurrent provider connections this instance will carry.
    pub max_sessions: usize,
    pub connection: ConnectionConfig,
}

impl Default for SttManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            connection: ConnectionConfig::default(),
        }
    }
}

pub struct SttSessionManager {
    provider: Arc<dyn SttProvider>,
    config: SttManagerConfig,
    transcript_tx: mpsc::Sender<TranscriptEventMessage>,
    connections: RwLock<HashMap<String, ProviderConnection>>,
}

impl SttSessionManager {
    /// Builds the manager and the receiver carrying every session's
    /// transcript events, which `run_engine` publishes to the bus.
    pub fn new(
        provider: Arc<dyn SttProvider>,
        config: SttManagerConfig,
    ) -> (Self, mpsc::Receiver<TranscriptEventMessage>) {
        let (transcript_tx, transcript_rx) = mpsc::channel(256);
        let manager = Self {
            provider,
            config,
            transcript_tx,
            connections: RwLock::new(HashMap::new()),
        };
        (manager, transcript_rx)
    }

    /// Registers a session. Idempotent for known sessions; refuses when
    /// the connection cap is reached.
    pub fn create_session(&self, session_id: &str) -> bool {
        let mut connections = self.connections.write();
        if connections.contains_key(session_id) {
            return true;
        }
        if connections.len() >= self.config.max_sessions {
            warn!(
                "STT session cap reached ({}), refusing session {}",
                self.config.max_sessions, session_id
            );
            return false;
        }

        let connection = ProviderConnection::spawn(
            session_id,
            self.provider.clone(),
            self.config.connection.clone(),
            self.transcript_tx.clone(),
        );
        connections.insert(session_id.to_string(), connection);
        info!("Tracking STT session {}", session_id);
        true
    }

    /// Routes a frame to the session's actor. Unknown sessions are a
    /// silent drop; the session may have ended moments ago.
    pub fn send_audio(&self, session_id: &str, frame: Vec<u8>) {
        let connections = self.connections.read();
        match connections.get(session_id) {
            Some(connection) => connection.send_audio(frame),
            None => debug!("Dropping audio for untracked session {}", session_id),
        }
    }

    pub async fn close_session(&self, session_id: &str) {
        let connection = self.connections.write().remove(session_id);
        if let Some(connection) = connection {
            connection.close().await;
            info!("Closed STT session {}", session_id);
        }
    }

    /// Closes every tracked connection concurrently; used on shutdown.
    pub async fn close_all(&self) {
        let connections: Vec<_> = {
            let mut map = self.connections.write();
            map.drain().collect()
        };
        if connections.is_empty() {
            return;
        }

        info!("Closing {} STT sessions", connections.len());
        join_all(
            connections
                .into_iter()
                .map(|(_, connection)| connection.close()),
        )
        .await;
    }

    pub fn session_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn session_state(&self, session_id: &str) -> Option<ConnectionState> {
        self.connections.read().get(session_id).map(|c| c.state())
    }
}

/// Bus loop for the STT engine: session lifecycle in, audio in,
/// transcript events out.
pub async fn run_engine(
    bus: BusClient,
    topics: Topics,
    manager: Arc<SttSessionManager>,
    mut transcript_rx: mpsc::Receiver<TranscriptEventMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut starts = bus.subscribe(topics.session_started()).await?;
    let mut frames = bus.subscribe(topics.audio_frames_all()).await?;
    let mut endings = bus.subscribe(topics.session_ended()).await?;

    loop {
        tokio::select! {
            Some(message) = starts.next() => {
                let started: SessionStartedMessage = match serde_json::from_slice(&message.payload) {
                    Ok(started) => started,
                    Err(e) => {
                        warn!("Ignoring malformed session start event: {}", e);
                        continue;
                    }
                };
                manager.create_session(&started.session_id);
            }
            Some(message) = frames.next() => {
                let frame: AudioFrameMessage = match serde_json::from_slice(&message.payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Ignoring malformed audio frame: {}", e);
                        continue;
                    }
                };
                match frame.decode_audio() {
                    Ok(audio) => manager.send_audio(&frame.session_id, audio),
                    Err(e) => warn!("Ignoring undecodable audio frame for session {}: {}", frame.session_id, e),
                }
            }
            Some(message) = endings.next() => {
                let ended: SessionEndedMessage = match serde_json::from_slice(&message.payload) {
                    Ok(ended) => ended,
                    Err(e) => {
                        warn!("Ignoring malformed session end event: {}", e);
                        continue;
                    }
                };
                manager.close_session(&ended.session_id).await;
            }
            Some(event) = transcript_rx.recv() => {
                publish_transcript(&bus, &topics, &event).await;
            }
            _ = shutdown.changed() => break,
            else => break,
        }
    }

    manager.close_all().await;

    // Publish whatever the actors emitted while closing.
    while let Ok(event) = transcript_rx.try_recv() {
        publish_transcript(&bus, &topics, &event).await;
    }

    Ok(())
}

async fn publish_transcript(bus: &BusClient, topics: &Topics, event: &TranscriptEventMessage) {
    let subject = topics.transcript(&event.session_id, event.is_final);
    if let Err(e) = bus.publish_json(subject, event).await {
        warn!(
            "Failed to publish transcript event for session {}: {}",
            event.session_id, e
        );
    }
}
