//! Bounded per-session utterance history.
//!
//! Holds the most recent utterances for one session under two bounds:
//! a fixed capacity (oldest overwritten first) and a maximum age, swept
//! on every push so stale entries never linger between pushes.

use std::collections::VecDeque;

use crate::transcript::Utterance;

#[derive(Debug, Clone)]
pub struct ContextBufferConfig {
    pub capacity: usize,
    pub max_age_ms: u64,
}

impl Default for ContextBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_age_ms: 120_000,
        }
    }
}

pub struct ContextBuffer {
    config: ContextBufferConfig,
    entries: VecDeque<Utterance>,
}

impl ContextBuffer {
    pub fn new() -> Self {
        Self::with_config(ContextBufferConfig::default())
    }

    pub fn with_config(config: ContextBufferConfig) -> Self {
        Self {
            entries: VecDeque::with_capacity(config.capacity),
            config,
        }
    }

    /// Appends an utterance, evicting expired entries first, then the
    /// oldest entry if the buffer is at capacity.
    pub fn push(&mut self, utterance: Utterance) {
        self.sweep_expired(chrono::Utc::now().timestamp_millis());

        if self.entries.len() >= self.config.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(utterance);
    }

    fn sweep_expired(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.config.max_age_ms as i64;
        while let Some(oldest) = self.entries.front() {
            if oldest.timestamp < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All buffered utterances in chronological order.
    pub fn all(&self) -> Vec<Utterance> {
        self.entries.iter().cloned().collect()
    }

    /// The most recent `n` utterances in chronological order.
    pub fn recent(&self, n: usize) -> Vec<Utterance> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn by_speaker(&self, speaker: &str) -> Vec<Utterance> {
        self.entries
            .iter()
            .filter(|u| u.speaker == speaker)
            .cloned()
            .collect()
    }

    pub fn by_topic(&self, topic_id: &str) -> Vec<Utterance> {
        self.entries
            .iter()
            .filter(|u| u.topic_id.as_deref() == Some(topic_id))
            .cloned()
            .collect()
    }

    /// Utterances whose timestamp falls inside `[from_ts, to_ts]`.
    pub fn in_window(&self, from_ts: i64, to_ts: i64) -> Vec<Utterance> {
        self.entries
            .iter()
            .filter(|u| u.timestamp >= from_ts && u.timestamp <= to_ts)
            .cloned()
            .collect()
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new()
    }
}
