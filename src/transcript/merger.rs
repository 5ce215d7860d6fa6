//! Utterance merger.
//!
//! STT providers split continuous speech into short finals at breath
//! pauses. The merger re-joins consecutive finals from the same speaker
//! when the silence between them is short, so downstream consumers see
//! sentence-sized utterances instead of fragments.

use crate::transcript::Utterance;

#[derive(Debug, Clone)]
pub struct MergerConfig {
    /// Finals from the same speaker within this gap are merged.
    pub merge_gap_ms: u64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self { merge_gap_ms: 5_000 }
    }
}

/// Per-session reducer holding at most one pending utterance.
///
/// `push` either absorbs the new utterance into the pending one or emits
/// the pending one and makes the new utterance pending. `flush` emits
/// whatever is pending, used at session close.
pub struct UtteranceMerger {
    config: MergerConfig,
    pending: Option<Utterance>,
}

impl UtteranceMerger {
    pub fn new() -> Self {
        Self::with_config(MergerConfig::default())
    }

    pub fn with_config(config: MergerConfig) -> Self {
        Self {
            config,
            pending: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feeds one utterance through the reducer. Returns an utterance the
    /// caller must publish, if one was displaced.
    pub fn push(&mut self, utterance: Utterance) -> Option<Utterance> {
        let Some(pending) = self.pending.as_mut() else {
            self.pending = Some(utterance);
            return None;
        };

        let gap_ms = utterance.timestamp - pending.end_timestamp();
        if pending.speaker == utterance.speaker && gap_ms <= self.config.merge_gap_ms as i64 {
            merge_into(pending, utterance, gap_ms);
            return None;
        }

        self.pending.replace(utterance)
    }

    /// Emits the pending utterance unconditionally.
    pub fn flush(&mut self) -> Option<Utterance> {
        self.pending.take()
    }
}

impl Default for UtteranceMerger {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_into(pending: &mut Utterance, next: Utterance, gap_ms: i64) {
    let total_words = pending.word_count + next.word_count;
    if total_words > 0 {
        pending.confidence_score = (pending.confidence_score * pending.word_count as f32
            + next.confidence_score * next.word_count as f32)
            / total_words as f32;
    }

    pending.text.push(' ');
    pending.text.push_str(&next.text);
    pending.word_count = total_words;
    // Overlapping events report a negative gap; it adds nothing.
    pending.duration += gap_ms.max(0) as u64 + next.duration;
    pending.merged_count += next.merged_count;
    if pending.topic_id.is_none() {
        pending.topic_id = next.topic_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_utterance(seq: u64, speaker: &str, text: &str, timestamp: i64) -> Utterance {
        Utterance {
            utterance_id: format!("sess-1:{}", seq),
            session_id: "sess-1".to_string(),
            speaker: speaker.to_string(),
            text: text.to_string(),
            timestamp,
            confidence_score: 0.9,
            start_offset: 0,
            duration: 0,
            word_count: text.split_whitespace().count(),
            merged_count: 1,
            topic_id: None,
        }
    }

    #[test]
    fn test_first_push_emits_nothing() {
        let mut merger = UtteranceMerger::new();
        assert!(merger.push(make_utterance(1, "spk_0", "Hello.", 1_000)).is_none());
        assert!(merger.has_pending());
    }

    #[test]
    fn test_same_speaker_within_gap_merges() {
        let mut merger = UtteranceMerger::new();
        assert!(merger.push(make_utterance(1, "spk_0", "Hello there.", 1_000)).is_none());
        assert!(merger.push(make_utterance(2, "spk_0", "How are you?", 2_500)).is_none());

        let merged = merger.flush().unwrap();
        assert_eq!(merged.text, "Hello there. How are you?");
        assert_eq!(merged.merged_count, 2);
        assert_eq!(merged.word_count, 5);
        assert_eq!(merged.utterance_id, "sess-1:1");
    }

    #[test]
    fn test_merged_confidence_is_word_weighted() {
        let mut merger = UtteranceMerger::new();

        let mut first = make_utterance(1, "spk_0", "one two three", 1_000);
        first.confidence_score = 0.6;
        let mut second = make_utterance(2, "spk_0", "four", 2_000);
        second.confidence_score = 1.0;

        merger.push(first);
        merger.push(second);

        let merged = merger.flush().unwrap();
        // (0.6 * 3 + 1.0 * 1) / 4
        assert!((merged.confidence_score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_merge_extends_duration_by_gap() {
        let mut merger = UtteranceMerger::new();

        let mut first = make_utterance(1, "spk_0", "Hello.", 1_000);
        first.duration = 800;
        let mut second = make_utterance(2, "spk_0", "Again.", 3_300);
        second.duration = 500;

        merger.push(first);
        merger.push(second);

        let merged = merger.flush().unwrap();
        // 800 + (3300 - 1800) + 500
        assert_eq!(merged.duration, 2_800);
    }

    #[test]
    fn test_overlapping_events_merge_without_negative_gap() {
        let mut merger = UtteranceMerger::new();

        let mut first = make_utterance(1, "spk_0", "Hello.", 1_000);
        first.duration = 2_000;
        let mut second = make_utterance(2, "spk_0", "Again.", 2_500);
        second.duration = 400;

        merger.push(first);
        merger.push(second);

        let merged = merger.flush().unwrap();
        assert_eq!(merged.duration, 2_400);
    }

    #[test]
    fn test_different_speaker_emits_pending() {
        let mut merger = UtteranceMerger::new();
        merger.push(make_utterance(1, "spk_0", "Hello.", 1_000));

        let emitted = merger.push(make_utterance(2, "spk_1", "Hi.", 1_200)).unwrap();
        assert_eq!(emitted.speaker, "spk_0");
        assert_eq!(emitted.merged_count, 1);

        let pending = merger.flush().unwrap();
        assert_eq!(pending.speaker, "spk_1");
    }

    #[test]
    fn test_gap_above_threshold_emits_pending() {
        let mut merger = UtteranceMerger::with_config(MergerConfig { merge_gap_ms: 5_000 });
        merger.push(make_utterance(1, "spk_0", "Hello.", 1_000));

        let emitted = merger.push(make_utterance(2, "spk_0", "Back again.", 10_000)).unwrap();
        assert_eq!(emitted.text, "Hello.");
        assert!(merger.has_pending());
    }

    #[test]
    fn test_flush_empty_merger() {
        let mut merger = UtteranceMerger::new();
        assert!(merger.flush().is_none());
    }
}
