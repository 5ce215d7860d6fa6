//! Streaming STT provider abstraction.
//!
//! The connection actor speaks to providers through a narrow seam: open
//! a session, push raw audio in, receive transcript and close events
//! out. Production uses the streaming HTTP implementation; tests and
//! local development use the scripted provider.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One transcript callback from the provider.
#[derive(Debug, Clone)]
pub struct ProviderTranscript {
    pub transcript: String,
    pub confidence: f32,
    /// Diarization speaker index, when the provider produced one.
    pub speaker: Option<i32>,
    pub is_final: bool,
    /// Offset from the start of the provider stream, in milliseconds.
    pub start_ms: u64,
    pub duration_ms: u64,
}

/// Why the provider ended a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The provider timed out on silence. Not an error; the next audio
    /// frame opens a fresh session.
    IdleTimeout,
    /// The provider finished the stream without an error.
    EndOfStream,
    Error(String),
}

#[derive(Debug, Clone)]
pub enum ProviderEvent {
    Transcript(ProviderTranscript),
    Closed { reason: CloseReason },
}

/// A live provider session. Dropping `audio` ends the upload; `events`
/// yields transcripts until the provider closes.
pub struct ProviderSession {
    pub audio: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<ProviderEvent>,
}

#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    /// Open a streaming session with the provider.
    async fn connect(&self, session_id: &str) -> Result<ProviderSession>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Streaming endpoint, e.g. `http://stt:9090/v1/stream`.
    pub url: String,
    pub api_key: Option<String>,
    pub connect_timeout_ms: u64,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090/v1/stream".to_string(),
            api_key: None,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Streaming HTTP provider: audio goes up as a chunked request body,
/// transcript events come back as JSON lines on the response body.
pub struct HttpSttProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpSttProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self> {
        // No overall request timeout: sessions stream for as long as the
        // meeting runs.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .context("Failed to build STT provider HTTP client")?;

        Ok(Self { client, config })
    }
}

/// One JSON line on the provider's response stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    speaker: Option<i32>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    start: u64,
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    reason: Option<String>,
}

impl WireEvent {
    fn into_event(self) -> Option<ProviderEvent> {
        match self.kind.as_str() {
            "transcript" => Some(ProviderEvent::Transcript(ProviderTranscript {
                transcript: self.transcript,
                confidence: self.confidence,
                speaker: self.speaker,
                is_final: self.is_final,
                start_ms: self.start,
                duration_ms: self.duration,
            })),
            "closed" => {
                let reason = match self.reason.as_deref() {
                    Some("idle_timeout") => CloseReason::IdleTimeout,
                    Some("end_of_stream") | None => CloseReason::EndOfStream,
                    Some(other) => CloseReason::Error(other.to_string()),
                };
                Some(ProviderEvent::Closed { reason })
            }
            other => {
                debug!("Ignoring unknown provider event type {:?}", other);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl SttProvider for HttpSttProvider {
    async fn connect(&self, session_id: &str) -> Result<ProviderSession> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(64);

        // Bridge the session's audio channel onto the request body.
        let (mut body_tx, body_rx) =
            futures::channel::mpsc::channel::<std::io::Result<Vec<u8>>>(64);
        tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                if body_tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });

        let mut request = self
            .client
            .post(&self.config.url)
            .header("content-type", "application/octet-stream")
            .header("x-session-id", session_id)
            .body(reqwest::Body::wrap_stream(body_rx));
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to open STT stream for session {}", session_id))?;
        if !response.status().is_success() {
            bail!(
                "STT provider rejected session {}: {}",
                session_id,
                response.status()
            );
        }

        let session = session_id.to_string();
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = event_tx
                            .send(ProviderEvent::Closed {
                                reason: CloseReason::Error(e.to_string()),
                            })
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);
                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = &line[..line.len() - 1];
                    if line.is_empty() {
                        continue;
                    }

                    let wire: WireEvent = match serde_json::from_slice(line) {
                        Ok(wire) => wire,
                        Err(e) => {
                            warn!("Malformed provider event for session {}: {}", session, e);
                            continue;
                        }
                    };

                    let closed = matches!(wire.kind.as_str(), "closed");
                    if let Some(event) = wire.into_event() {
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    if closed {
                        return;
                    }
                }
            }

            // Response ended without a terminal record.
            let _ = event_tx
                .send(ProviderEvent::Closed {
                    reason: CloseReason::EndOfStream,
                })
                .await;
        });

        Ok(ProviderSession {
            audio: audio_tx,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "http-stream"
    }
}

/// Controller handed to the test for each scripted connect: inject
/// provider events, observe forwarded audio.
pub struct ScriptedSession {
    pub session_id: String,
    pub events: mpsc::Sender<ProviderEvent>,
    pub audio: mpsc::Receiver<Vec<u8>>,
}

/// In-process provider with no speech recognition behind it. Each
/// connect emits a [`ScriptedSession`] on the handle channel so the
/// caller can script transcripts and closures.
pub struct ScriptedProvider {
    handles: mpsc::Sender<ScriptedSession>,
    connects: Arc<AtomicUsize>,
    fail_connects: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new() -> (Self, mpsc::Receiver<ScriptedSession>) {
        let (handles, sessions) = mpsc::channel(16);
        let provider = Self {
            handles,
            connects: Arc::new(AtomicUsize::new(0)),
            fail_connects: Arc::new(AtomicUsize::new(0)),
        };
        (provider, sessions)
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SttProvider for ScriptedProvider {
    async fn connect(&self, session_id: &str) -> Result<ProviderSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            bail!("scripted connect failure for session {}", session_id);
        }

        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let _ = self.handles.try_send(ScriptedSession {
            session_id: session_id.to_string(),
            events: event_tx,
            audio: audio_rx,
        });

        Ok(ProviderSession {
            audio: audio_tx,
            events: event_rx,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_transcript_maps_to_event() {
        let line = r#"{"type":"transcript","transcript":"hello","confidence":0.92,"speaker":0,"isFinal":true,"start":100,"duration":400}"#;
        let wire: WireEvent = serde_json::from_str(line).unwrap();

        match wire.into_event().unwrap() {
            ProviderEvent::Transcript(t) => {
                assert_eq!(t.transcript, "hello");
                assert_eq!(t.speaker, Some(0));
                assert!(t.is_final);
                assert_eq!(t.start_ms, 100);
                assert_eq!(t.duration_ms, 400);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_wire_close_reasons() {
        let idle: WireEvent =
            serde_json::from_str(r#"{"type":"closed","reason":"idle_timeout"}"#).unwrap();
        match idle.into_event().unwrap() {
            ProviderEvent::Closed { reason } => assert_eq!(reason, CloseReason::IdleTimeout),
            other => panic!("unexpected event: {:?}", other),
        }

        let plain: WireEvent = serde_json::from_str(r#"{"type":"closed"}"#).unwrap();
        match plain.into_event().unwrap() {
            ProviderEvent::Closed { reason } => assert_eq!(reason, CloseReason::EndOfStream),
            other => panic!("unexpected event: {:?}", other),
        }

        let error: WireEvent =
            serde_json::from_str(r#"{"type":"closed","reason":"upstream 503"}"#).unwrap();
        match error.into_event().unwrap() {
            ProviderEvent::Closed { reason } => {
                assert_eq!(reason, CloseReason::Error("upstream 503".to_string()));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_wire_transcript_without_speaker() {
        let line = r#"{"type":"transcript","transcript":"hi","confidence":0.5,"isFinal":false}"#;
        let wire: WireEvent = serde_json::from_str(line).unwrap();

        match wire.into_event().unwrap() {
            ProviderEvent::Transcript(t) => assert_eq!(t.speaker, None),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
