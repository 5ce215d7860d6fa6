use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Audio frame relayed from the gateway to the STT engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrameMessage {
    pub session_id: String,
    pub ts: i64,
    /// Base64-encoded audio bytes.
    pub frame: String,
    /// Which connection produced the frame.
    pub source: String,
}

impl AudioFrameMessage {
    pub fn new(session_id: &str, source: &str, audio: &[u8]) -> Self {
        Self {
            session_id: session_id.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            frame: base64::engine::general_purpose::STANDARD.encode(audio),
            source: source.to_string(),
        }
    }

    pub fn decode_audio(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.frame)
            .context("Failed to decode audio frame payload")
    }
}

/// Transcript event published by the STT engine, consumed by the finalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEventMessage {
    pub session_id: String,
    pub is_final: bool,
    pub transcript: String,
    pub confidence: f32,
    /// Speaker index from the provider's diarization, -1 when absent.
    pub diarization_index: i32,
    /// Offset from the start of the provider stream, in milliseconds.
    pub start: u64,
    pub duration: u64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartedMessage {
    pub session_id: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndedMessage {
    pub session_id: String,
    pub ts: i64,
    /// How long the session was live, in milliseconds.
    pub duration: u64,
}
