// Integration tests for the utterance finalizer
//
// These tests verify partial buffering, final normalization, per-session
// sequence numbering, and the merge-through on session close.

use meeting_relay::bus::TranscriptEventMessage;
use meeting_relay::transcript::{FinalizerConfig, UtteranceFinalizer};

fn event(
    session_id: &str,
    is_final: bool,
    text: &str,
    speaker: i32,
    ts: i64,
) -> TranscriptEventMessage {
    TranscriptEventMessage {
        session_id: session_id.to_string(),
        is_final,
        transcript: text.to_string(),
        confidence: 0.9,
        diarization_index: speaker,
        start: 0,
        duration: 400,
        ts,
    }
}

#[test]
fn test_partials_buffer_without_emitting() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    assert!(finalizer.process(&event("sess-1", false, "hel", 0, 1_000)).is_none());
    assert!(finalizer.process(&event("sess-1", false, "hello", 0, 1_200)).is_none());
    assert!(finalizer.process(&event("sess-1", false, "hello eve", 0, 1_400)).is_none());
    assert_eq!(finalizer.partial_count("sess-1"), 3);
}

#[test]
fn test_partial_overflow_drops_oldest() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig {
        max_partials: 3,
        merge_gap_ms: 5_000,
    });

    for i in 0..5 {
        finalizer.process(&event("sess-1", false, "partial", 0, 1_000 + i));
    }
    assert_eq!(finalizer.partial_count("sess-1"), 3);
}

#[test]
fn test_final_clears_partials_and_normalizes() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    finalizer.process(&event("sess-1", false, "hello wor", 0, 1_000));
    // The final is held by the merger until displaced or flushed.
    assert!(finalizer.process(&event("sess-1", true, "  hello   world  ", 0, 1_500)).is_none());
    assert_eq!(finalizer.partial_count("sess-1"), 0);

    let utterance = finalizer.close_session("sess-1").expect("pending final");
    assert_eq!(utterance.utterance_id, "sess-1:1");
    assert_eq!(utterance.text, "Hello world.");
    assert_eq!(utterance.speaker, "spk_0");
    assert_eq!(utterance.word_count, 2);
    assert_eq!(utterance.merged_count, 1);
    assert_eq!(utterance.timestamp, 1_500);
}

#[test]
fn test_empty_final_is_dropped_without_a_sequence() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    assert!(finalizer.process(&event("sess-1", true, "   ", 0, 1_000)).is_none());
    assert!(finalizer.process(&event("sess-1", true, "still here", 0, 2_000)).is_none());

    // The discarded final did not consume a sequence number.
    let utterance = finalizer.close_session("sess-1").unwrap();
    assert_eq!(utterance.utterance_id, "sess-1:1");
    assert_eq!(utterance.text, "Still here.");
}

#[test]
fn test_same_speaker_close_finals_merge() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    assert!(finalizer.process(&event("sess-1", true, "first half", 0, 1_000)).is_none());
    assert!(finalizer.process(&event("sess-1", true, "second half", 0, 2_000)).is_none());

    let utterance = finalizer.close_session("sess-1").unwrap();
    assert_eq!(utterance.text, "First half. Second half.");
    assert_eq!(utterance.merged_count, 2);
    assert_eq!(utterance.word_count, 4);
    assert_eq!(utterance.utterance_id, "sess-1:1");
}

#[test]
fn test_speaker_change_displaces_pending() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    assert!(finalizer.process(&event("sess-1", true, "from zero", 0, 1_000)).is_none());
    let displaced = finalizer
        .process(&event("sess-1", true, "from one", 1, 1_500))
        .expect("speaker change emits the pending utterance");
    assert_eq!(displaced.speaker, "spk_0");
    assert_eq!(displaced.utterance_id, "sess-1:1");

    let pending = finalizer.close_session("sess-1").unwrap();
    assert_eq!(pending.speaker, "spk_1");
    assert_eq!(pending.utterance_id, "sess-1:2");
}

#[test]
fn test_long_silence_displaces_pending() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig {
        max_partials: 50,
        merge_gap_ms: 2_000,
    });

    assert!(finalizer.process(&event("sess-1", true, "before the break", 0, 1_000)).is_none());
    // Gap from end of previous (1_000 + 400) to 10_000 far exceeds 2s.
    let displaced = finalizer
        .process(&event("sess-1", true, "after the break", 0, 10_000))
        .expect("silence gap emits the pending utterance");
    assert_eq!(displaced.text, "Before the break.");
}

#[test]
fn test_missing_diarization_labels_unknown() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    finalizer.process(&event("sess-1", true, "who said this", -1, 1_000));
    let utterance = finalizer.close_session("sess-1").unwrap();
    assert_eq!(utterance.speaker, "spk_unknown");
}

#[test]
fn test_sessions_number_independently() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    finalizer.process(&event("sess-a", true, "alpha", 0, 1_000));
    finalizer.process(&event("sess-b", true, "beta", 0, 1_000));
    assert_eq!(finalizer.session_count(), 2);

    let mut ids: Vec<String> = finalizer
        .close_all()
        .into_iter()
        .map(|u| u.utterance_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["sess-a:1".to_string(), "sess-b:1".to_string()]);
    assert_eq!(finalizer.session_count(), 0);
}

#[test]
fn test_close_unknown_session_is_noop() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());
    assert!(finalizer.close_session("ghost").is_none());
}

#[test]
fn test_closed_session_ignores_late_transcripts() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    assert!(finalizer.process(&event("sess-1", true, "spoken in time", 0, 1_000)).is_none());
    let flushed = finalizer.close_session("sess-1").expect("pending final");
    assert_eq!(flushed.text, "Spoken in time.");
    assert_eq!(finalizer.session_count(), 0);

    // Provider output is forwarded asynchronously and can trail the end
    // event; nothing may recreate the closed session's state.
    assert!(finalizer.process(&event("sess-1", true, "spoken too late", 0, 2_000)).is_none());
    assert!(finalizer.process(&event("sess-1", false, "partial too", 0, 2_100)).is_none());
    assert_eq!(finalizer.session_count(), 0);
    assert!(finalizer.close_all().is_empty());
}

#[test]
fn test_end_before_any_transcript_blocks_stragglers() {
    let finalizer = UtteranceFinalizer::new(FinalizerConfig::default());

    assert!(finalizer.close_session("sess-1").is_none());
    assert!(finalizer.process(&event("sess-1", true, "never mind", 0, 1_000)).is_none());
    assert_eq!(finalizer.session_count(), 0);
}
