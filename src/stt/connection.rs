//! Per-session STT provider connection.
//!
//! One actor per session owns the provider link and its lifecycle:
//! - no connection exists until the first audio frame arrives; the
//!   triggering frame (and anything sent while connecting) is dropped,
//!   never queued;
//! - an idle close from the provider parks the session until the next
//!   audio frame;
//! - any other close reconnects immediately with capped exponential
//!   backoff, giving up for good after a fixed number of attempts;
//! - `close` is terminal.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::TranscriptEventMessage;
use crate::stt::provider::{CloseReason, ProviderEvent, ProviderTranscript, SttProvider};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    pub max_reconnect_attempts: u32,
    /// Audio frames queued to the actor before the newest are shed.
    pub audio_queue: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 500,
            reconnect_cap_ms: 30_000,
            max_reconnect_attempts: 5,
            audio_queue: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No provider link; the next audio frame triggers a connect.
    Disconnected,
    Connecting,
    Active,
    Reconnecting,
    /// Reconnect attempts exhausted; audio is discarded until close.
    Failed,
    Closed,
}

enum ConnectionCommand {
    Audio(Vec<u8>),
    Close,
}

/// Handle to one session's connection actor.
pub struct ProviderConnection {
    session_id: String,
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    state: Arc<RwLock<ConnectionState>>,
    task: JoinHandle<()>,
}

impl ProviderConnection {
    pub fn spawn(
        session_id: &str,
        provider: Arc<dyn SttProvider>,
        config: ConnectionConfig,
        transcript_tx: mpsc::Sender<TranscriptEventMessage>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.audio_queue);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let task = tokio::spawn(run_connection(
            session_id.to_string(),
            provider,
            config,
            transcript_tx,
            cmd_rx,
            state.clone(),
        ));

        Self {
            session_id: session_id.to_string(),
            cmd_tx,
            state,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Hands a frame to the actor without blocking. A full queue sheds
    /// the frame; live audio tolerates loss better than latency.
    pub fn send_audio(&self, frame: Vec<u8>) {
        match self.cmd_tx.try_send(ConnectionCommand::Audio(frame)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Audio queue full for session {}, dropping frame", self.session_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Dropping audio for closed STT session {}", self.session_id);
            }
        }
    }

    /// Terminal close: stops the actor and waits for it to finish.
    pub async fn close(self) {
        let _ = self.cmd_tx.send(ConnectionCommand::Close).await;
        let _ = self.task.await;
    }
}

enum ActiveOutcome {
    /// Close command or manager gone.
    Shutdown,
    /// Provider idle timeout; wait for the next audio frame.
    Idle,
    /// Provider closed for another reason; reconnect now.
    Retry(String),
}

async fn run_connection(
    session_id: String,
    provider: Arc<dyn SttProvider>,
    config: ConnectionConfig,
    transcript_tx: mpsc::Sender<TranscriptEventMessage>,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
    state: Arc<RwLock<ConnectionState>>,
) {
    let mut attempts: u32 = 0;
    let mut wait_for_audio = true;

    loop {
        if wait_for_audio {
            *state.write() = ConnectionState::Disconnected;
            loop {
                match cmd_rx.recv().await {
                    None | Some(ConnectionCommand::Close) => {
                        *state.write() = ConnectionState::Closed;
                        return;
                    }
                    // The triggering frame is dropped, not queued.
                    Some(ConnectionCommand::Audio(_)) => break,
                }
            }
        }

        // Connect, backing off between failed attempts. Audio arriving
        // during this phase is shed; close is honored immediately.
        let mut session = loop {
            *state.write() = if attempts == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };

            let mut connect = provider.connect(&session_id);
            let result = loop {
                tokio::select! {
                    result = &mut connect => break result,
                    cmd = cmd_rx.recv() => match cmd {
                        None | Some(ConnectionCommand::Close) => {
                            *state.write() = ConnectionState::Closed;
                            return;
                        }
                        Some(ConnectionCommand::Audio(_)) => {}
                    }
                }
            };

            match result {
                Ok(session) => {
                    attempts = 0;
                    break session;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= config.max_reconnect_attempts {
                        error!(
                            "Giving up on STT provider {} for session {} after {} attempts: {}",
                            provider.name(),
                            session_id,
                            attempts,
                            e
                        );
                        *state.write() = ConnectionState::Failed;
                        loop {
                            match cmd_rx.recv().await {
                                None | Some(ConnectionCommand::Close) => {
                                    *state.write() = ConnectionState::Closed;
                                    return;
                                }
                                Some(ConnectionCommand::Audio(_)) => {}
                            }
                        }
                    }

                    let delay = backoff_delay(&config, attempts);
                    warn!(
                        "STT connect attempt {}/{} failed for session {}: {} (retrying in {:?})",
                        attempts, config.max_reconnect_attempts, session_id, e, delay
                    );

                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = &mut sleep => break,
                            cmd = cmd_rx.recv() => match cmd {
                                None | Some(ConnectionCommand::Close) => {
                                    *state.write() = ConnectionState::Closed;
                                    return;
                                }
                                Some(ConnectionCommand::Audio(_)) => {}
                            }
                        }
                    }
                }
            }
        };

        *state.write() = ConnectionState::Active;
        info!("STT provider connected for session {}", session_id);

        let outcome = loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(ConnectionCommand::Close) => break ActiveOutcome::Shutdown,
                    Some(ConnectionCommand::Audio(frame)) => {
                        if session.audio.send(frame).await.is_err() {
                            // The provider is tearing down; its close
                            // event decides what happens next.
                            debug!("Audio send raced with provider close for session {}", session_id);
                        }
                    }
                },
                event = session.events.recv() => match event {
                    None => break ActiveOutcome::Retry("provider event stream ended".to_string()),
                    Some(ProviderEvent::Transcript(transcript)) => {
                        forward_transcript(&session_id, transcript, &transcript_tx);
                    }
                    Some(ProviderEvent::Closed { reason }) => match reason {
                        CloseReason::IdleTimeout => break ActiveOutcome::Idle,
                        CloseReason::EndOfStream => {
                            break ActiveOutcome::Retry("provider ended the stream".to_string());
                        }
                        CloseReason::Error(e) => break ActiveOutcome::Retry(e),
                    }
                },
            }
        };

        drop(session);
        match outcome {
            ActiveOutcome::Shutdown => {
                *state.write() = ConnectionState::Closed;
                return;
            }
            ActiveOutcome::Idle => {
                info!(
                    "STT provider idled out for session {}, waiting for next audio",
                    session_id
                );
                wait_for_audio = true;
            }
            ActiveOutcome::Retry(cause) => {
                warn!(
                    "STT provider closed for session {} ({}), reconnecting",
                    session_id, cause
                );
                wait_for_audio = false;
            }
        }
    }
}

/// Maps a provider transcript onto the bus wire shape. Empty transcripts
/// vanish here; a missing or negative speaker index becomes -1.
fn forward_transcript(
    session_id: &str,
    transcript: ProviderTranscript,
    transcript_tx: &mpsc::Sender<TranscriptEventMessage>,
) {
    if transcript.transcript.trim().is_empty() {
        return;
    }

    let diarization_index = match transcript.speaker {
        Some(index) if index >= 0 => index,
        _ => -1,
    };

    let message = TranscriptEventMessage {
        session_id: session_id.to_string(),
        is_final: transcript.is_final,
        transcript: transcript.transcript,
        confidence: transcript.confidence,
        diarization_index,
        start: transcript.start_ms,
        duration: transcript.duration_ms,
        ts: chrono::Utc::now().timestamp_millis(),
    };

    if let Err(e) = transcript_tx.try_send(message) {
        warn!("Dropping transcript event for session {}: {}", session_id, e);
    }
}

fn backoff_delay(config: &ConnectionConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay_ms = config
        .reconnect_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.reconnect_cap_ms);
    Duration::from_millis(delay_ms)
}
