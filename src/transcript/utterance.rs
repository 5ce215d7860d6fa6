use serde::{Deserialize, Serialize};

/// A finalized, speaker-attributed piece of transcript.
///
/// Built by the finalizer from a final transcript event, possibly merged
/// with neighbors by the merger, and immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    /// Session-scoped id, `{sessionId}:{sequence}`.
    pub utterance_id: String,
    pub session_id: String,
    /// `spk_{n}` from the diarization index, `spk_unknown` when absent.
    pub speaker: String,
    pub text: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub confidence_score: f32,
    /// Offset from the start of the provider stream, in milliseconds.
    pub start_offset: u64,
    pub duration: u64,
    pub word_count: usize,
    /// How many raw finals were merged into this utterance, at least 1.
    pub merged_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
}

impl Utterance {
    /// End of the utterance on the session timeline, in epoch milliseconds.
    pub fn end_timestamp(&self) -> i64 {
        self.timestamp + self.duration as i64
    }
}

/// Maps a provider diarization index to a per-session speaker label.
pub fn speaker_label(diarization_index: i32) -> String {
    if diarization_index >= 0 {
        format!("spk_{}", diarization_index)
    } else {
        "spk_unknown".to_string()
    }
}
