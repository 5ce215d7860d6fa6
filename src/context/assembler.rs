//! Context assembly.
//!
//! Builds a bounded-size text window from buffered utterances, walking
//! newest to oldest so the freshest speech always survives the budget,
//! then emitting the survivors in chronological order.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::transcript::Utterance;

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    /// Total character budget for the assembled text.
    pub max_characters: usize,
    /// Characters held back for whatever framing the caller wraps around
    /// the window.
    pub reserved_characters: usize,
    pub topic_id: Option<String>,
    pub speaker: Option<String>,
    /// Inclusive timestamp window.
    pub window: Option<(i64, i64)>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            max_characters: 4_000,
            reserved_characters: 200,
            topic_id: None,
            speaker: None,
            window: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    /// Formatted lines, oldest first, joined with newlines.
    pub text: String,
    pub character_count: usize,
    pub utterance_count: usize,
    /// True when at least one matching utterance did not fit the budget.
    pub truncated: bool,
    /// Spread between the oldest and newest included timestamps.
    pub span_ms: u64,
    pub topic_ids: Vec<String>,
}

impl AssembledContext {
    fn empty() -> Self {
        Self {
            text: String::new(),
            character_count: 0,
            utterance_count: 0,
            truncated: false,
            span_ms: 0,
            topic_ids: Vec::new(),
        }
    }
}

fn matches(utterance: &Utterance, options: &AssembleOptions) -> bool {
    if let Some(topic_id) = &options.topic_id {
        if utterance.topic_id.as_deref() != Some(topic_id.as_str()) {
            return false;
        }
    }
    if let Some(speaker) = &options.speaker {
        if &utterance.speaker != speaker {
            return false;
        }
    }
    if let Some((from_ts, to_ts)) = options.window {
        if utterance.timestamp < from_ts || utterance.timestamp > to_ts {
            return false;
        }
    }
    true
}

/// Assembles a context window from chronologically ordered utterances.
///
/// Lines are `[speaker] text`. Accumulation runs newest to oldest and
/// stops at the first line that would overflow
/// `max_characters - reserved_characters`; lines are never split.
pub fn assemble(utterances: &[Utterance], options: &AssembleOptions) -> AssembledContext {
    let budget = options.max_characters.saturating_sub(options.reserved_characters);

    let mut lines: Vec<String> = Vec::new();
    let mut running = 0usize;
    let mut truncated = false;
    let mut min_ts = i64::MAX;
    let mut max_ts = i64::MIN;
    let mut topic_ids = BTreeSet::new();

    for utterance in utterances.iter().rev().filter(|u| matches(u, options)) {
        let line = format!("[{}] {}", utterance.speaker, utterance.text);
        let separator = if lines.is_empty() { 0 } else { 1 };
        let line_chars = line.chars().count();

        if running + separator + line_chars > budget {
            truncated = true;
            break;
        }

        running += separator + line_chars;
        min_ts = min_ts.min(utterance.timestamp);
        max_ts = max_ts.max(utterance.timestamp);
        if let Some(topic_id) = &utterance.topic_id {
            topic_ids.insert(topic_id.clone());
        }
        lines.push(line);
    }

    if lines.is_empty() {
        let mut assembled = AssembledContext::empty();
        assembled.truncated = truncated;
        return assembled;
    }

    lines.reverse();
    let utterance_count = lines.len();
    let text = lines.join("\n");

    AssembledContext {
        character_count: text.chars().count(),
        text,
        utterance_count,
        truncated,
        span_ms: (max_ts - min_ts).max(0) as u64,
        topic_ids: topic_ids.into_iter().collect(),
    }
}

const RECENT_PREFIX: &str = "Recent conversation:\n";
const RECENT_SUFFIX: &str = "\n[End of context]";

/// Recent-conversation window wrapped in a fixed framing block, sized so
/// the framed whole stays within `max_characters`.
pub fn assemble_recent(utterances: &[Utterance], max_characters: usize) -> AssembledContext {
    let reserve = RECENT_PREFIX.chars().count() + RECENT_SUFFIX.chars().count();
    let options = AssembleOptions {
        max_characters,
        reserved_characters: reserve,
        ..Default::default()
    };

    let mut assembled = assemble(utterances, &options);
    if !assembled.text.is_empty() {
        assembled.text = format!("{}{}{}", RECENT_PREFIX, assembled.text, RECENT_SUFFIX);
        assembled.character_count = assembled.text.chars().count();
    }
    assembled
}

/// Window restricted to one discussion topic.
pub fn assemble_topic(
    utterances: &[Utterance],
    topic_id: &str,
    max_characters: usize,
) -> AssembledContext {
    let options = AssembleOptions {
        max_characters,
        topic_id: Some(topic_id.to_string()),
        ..Default::default()
    };
    assemble(utterances, &options)
}
