//! Utterance finalizer.
//!
//! Consumes the raw partial/final transcript stream and turns it into
//! published utterances: partials are buffered for diagnostics, finals
//! are normalized, numbered, and fed through the per-session merger.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, SessionEndedMessage, Topics, TranscriptEventMessage};
use crate::transcript::merger::{MergerConfig, UtteranceMerger};
use crate::transcript::normalize::normalize_transcript;
use crate::transcript::utterance::{speaker_label, Utterance};

#[derive(Debug, Clone)]
pub struct FinalizerConfig {
    /// Partial transcripts retained per session between finals.
    pub max_partials: usize,
    pub merge_gap_ms: u64,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            max_partials: 50,
            merge_gap_ms: 5_000,
        }
    }
}

struct SessionTranscripts {
    partials: VecDeque<TranscriptEventMessage>,
    merger: UtteranceMerger,
    next_sequence: u64,
}

impl SessionTranscripts {
    fn new(config: &FinalizerConfig) -> Self {
        Self {
            partials: VecDeque::with_capacity(config.max_partials),
            merger: UtteranceMerger::with_config(MergerConfig {
                merge_gap_ms: config.merge_gap_ms,
            }),
            next_sequence: 1,
        }
    }
}

/// Closed session ids remembered so a transcript event that trails the
/// end event cannot recreate state. Oldest ids fall off first.
const ENDED_MEMORY: usize = 256;

/// Per-session transcript state keyed by session id. Sessions are
/// serialized individually; unrelated sessions never contend.
pub struct UtteranceFinalizer {
    config: FinalizerConfig,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionTranscripts>>>>,
    ended: Mutex<VecDeque<String>>,
}

impl UtteranceFinalizer {
    pub fn new(config: FinalizerConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            ended: Mutex::new(VecDeque::new()),
        }
    }

    /// Existing state, or fresh state for a session this finalizer has
    /// not seen. Sessions already closed get `None`: provider output is
    /// forwarded asynchronously and can trail the end event, and no
    /// later event would ever close the recreated state again.
    fn session_state(&self, session_id: &str) -> Option<Arc<Mutex<SessionTranscripts>>> {
        if let Some(state) = self.sessions.read().get(session_id) {
            return Some(state.clone());
        }

        let mut sessions = self.sessions.write();
        if self.recently_ended(session_id) {
            return None;
        }
        Some(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SessionTranscripts::new(&self.config))))
                .clone(),
        )
    }

    /// Feeds one transcript event through the finalizer. Returns an
    /// utterance the caller must publish, if one was emitted.
    pub fn process(&self, event: &TranscriptEventMessage) -> Option<Utterance> {
        let state = match self.session_state(&event.session_id) {
            Some(state) => state,
            None => {
                debug!(
                    "Dropping transcript event for closed session {}",
                    event.session_id
                );
                return None;
            }
        };
        let mut state = state.lock();

        if !event.is_final {
            if state.partials.len() >= self.config.max_partials {
                state.partials.pop_front();
                warn!(
                    "Partial buffer full for session {}, dropping oldest entry",
                    event.session_id
                );
            }
            state.partials.push_back(event.clone());
            return None;
        }

        // A final supersedes whatever partials led up to it.
        state.partials.clear();

        let text = normalize_transcript(&event.transcript);
        if text.is_empty() {
            return None;
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let word_count = text.split_whitespace().count();
        let utterance = Utterance {
            utterance_id: format!("{}:{}", event.session_id, sequence),
            session_id: event.session_id.clone(),
            speaker: speaker_label(event.diarization_index),
            text,
            timestamp: event.ts,
            confidence_score: event.confidence,
            start_offset: event.start,
            duration: event.duration,
            word_count,
            merged_count: 1,
            topic_id: None,
        };

        state.merger.push(utterance)
    }

    /// Flushes and drops the session's state. Returns the pending
    /// utterance, if any. The session is marked closed either way, so an
    /// end event observed before any transcript still blocks stragglers.
    pub fn close_session(&self, session_id: &str) -> Option<Utterance> {
        self.mark_ended(session_id);
        let state = self.sessions.write().remove(session_id)?;
        let mut state = state.lock();
        state.partials.clear();
        state.merger.flush()
    }

    /// Flushes every session, returning the pending utterances.
    pub fn close_all(&self) -> Vec<Utterance> {
        let drained: Vec<_> = self.sessions.write().drain().collect();
        drained
            .into_iter()
            .filter_map(|(session_id, state)| {
                self.mark_ended(&session_id);
                state.lock().merger.flush()
            })
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn mark_ended(&self, session_id: &str) {
        let mut ended = self.ended.lock();
        if ended.iter().any(|id| id == session_id) {
            return;
        }
        if ended.len() == ENDED_MEMORY {
            ended.pop_front();
        }
        ended.push_back(session_id.to_string());
    }

    fn recently_ended(&self, session_id: &str) -> bool {
        self.ended.lock().iter().any(|id| id == session_id)
    }

    pub fn partial_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|state| state.lock().partials.len())
            .unwrap_or(0)
    }
}

/// Consumes transcript events and session endings off the bus, publishing
/// utterances as the finalizer emits them.
pub async fn run_finalizer(
    bus: BusClient,
    topics: Topics,
    finalizer: Arc<UtteranceFinalizer>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut transcripts = bus.subscribe(topics.transcripts_all()).await?;
    let mut endings = bus.subscribe(topics.session_ended()).await?;

    loop {
        tokio::select! {
            Some(message) = transcripts.next() => {
                let event: TranscriptEventMessage = match serde_json::from_slice(&message.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Ignoring malformed transcript event: {}", e);
                        continue;
                    }
                };

                if let Some(utterance) = finalizer.process(&event) {
                    publish_utterance(&bus, &topics, &utterance).await;
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

                if let Some(utterance) = finalizer.close_session(&ended.session_id) {
                    publish_utterance(&bus, &topics, &utterance).await;
                }
            }
            _ = shutdown.changed() => break,
            else => break,
        }
    }

    // Drain so the tail of each conversation is not lost on shutdown.
    let pending = finalizer.close_all();
    if !pending.is_empty() {
        info!("Flushing {} pending utterances on shutdown", pending.len());
        for utterance in pending {
            publish_utterance(&bus, &topics, &utterance).await;
        }
    }

    Ok(())
}

async fn publish_utterance(bus: &BusClient, topics: &Topics, utterance: &Utterance) {
    let subject = topics.utterance_created(&utterance.session_id);
    if let Err(e) = bus.publish_json(subject, utterance).await {
        warn!(
            "Failed to publish utterance {}: {}",
            utterance.utterance_id, e
        );
    }
}
