//! Per-session context buffers fed from the bus.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::bus::{BusClient, SessionEndedMessage, Topics};
use crate::context::assembler::{assemble, assemble_recent, assemble_topic, AssembleOptions, AssembledContext};
use crate::context::buffer::{ContextBuffer, ContextBufferConfig};
use crate::transcript::Utterance;

#[derive(Debug, Clone)]
pub struct ContextStoreConfig {
    pub capacity: usize,
    pub max_age_ms: u64,
    pub max_characters: usize,
    pub reserved_characters: usize,
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_age_ms: 120_000,
            max_characters: 4_000,
            reserved_characters: 200,
        }
    }
}

/// Ended session ids remembered so a trailing utterance cannot recreate
/// a buffer the end event already dropped. Oldest ids fall off first.
const ENDED_MEMORY: usize = 256;

/// Context buffers keyed by session id, serialized per session.
pub struct ContextStore {
    config: ContextStoreConfig,
    sessions: RwLock<HashMap<String, Arc<Mutex<ContextBuffer>>>>,
    ended: Mutex<VecDeque<String>>,
}

impl ContextStore {
    pub fn new(config: ContextStoreConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            ended: Mutex::new(VecDeque::new()),
        }
    }

    /// Existing buffer, or a fresh one for a session this store has not
    /// seen. Sessions already marked ended get `None`: the finalizer
    /// flushes its pending tail after the end event, and that utterance
    /// must not bring the buffer back.
    fn session_buffer(&self, session_id: &str) -> Option<Arc<Mutex<ContextBuffer>>> {
        if let Some(buffer) = self.sessions.read().get(session_id) {
            return Some(buffer.clone());
        }

        let mut sessions = self.sessions.write();
        if self.recently_ended(session_id) {
            return None;
        }
        let config = ContextBufferConfig {
            capacity: self.config.capacity,
            max_age_ms: self.config.max_age_ms,
        };
        Some(
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ContextBuffer::with_config(config))))
                .clone(),
        )
    }

    pub fn push(&self, utterance: Utterance) {
        let buffer = match self.session_buffer(&utterance.session_id) {
            Some(buffer) => buffer,
            None => {
                debug!(
                    "Dropping utterance {} for ended session {}",
                    utterance.utterance_id, utterance.session_id
                );
                return;
            }
        };
        buffer.lock().push(utterance);
    }

    /// Snapshot of the session's buffer, chronological. `None` when the
    /// session has no buffered context.
    pub fn snapshot(&self, session_id: &str) -> Option<Vec<Utterance>> {
        let buffer = self.sessions.read().get(session_id)?.clone();
        let utterances = buffer.lock().all();
        Some(utterances)
    }

    pub fn assemble(&self, session_id: &str, options: &AssembleOptions) -> Option<AssembledContext> {
        self.snapshot(session_id)
            .map(|utterances| assemble(&utterances, options))
    }

    pub fn assemble_recent(&self, session_id: &str, max_characters: usize) -> Option<AssembledContext> {
        self.snapshot(session_id)
            .map(|utterances| assemble_recent(&utterances, max_characters))
    }

    pub fn assemble_topic(
        &self,
        session_id: &str,
        topic_id: &str,
        max_characters: usize,
    ) -> Option<AssembledContext> {
        self.snapshot(session_id)
            .map(|utterances| assemble_topic(&utterances, topic_id, max_characters))
    }

    /// Drops the session's buffer and remembers the id. Marking happens
    /// even when no buffer exists yet, so an end event observed before
    /// the session's first utterance still blocks late arrivals.
    pub fn remove_session(&self, session_id: &str) -> bool {
        self.mark_ended(session_id);
        self.sessions.write().remove(session_id).is_some()
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

    pub fn default_options(&self) -> AssembleOptions {
        AssembleOptions {
            max_characters: self.config.max_characters,
            reserved_characters: self.config.reserved_characters,
            ..Default::default()
        }
    }
}

/// Feeds the store from the utterance stream and drops buffers when
/// sessions end.
pub async fn run_store(
    bus: BusClient,
    topics: Topics,
    store: Arc<ContextStore>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut utterances = bus.subscribe(topics.utterances_all()).await?;
    let mut endings = bus.subscribe(topics.session_ended()).await?;

    loop {
        tokio::select! {
            Some(message) = utterances.next() => {
                let utterance: Utterance = match serde_json::from_slice(&message.payload) {
                    Ok(utterance) => utterance,
                    Err(e) => {
                        warn!("Ignoring malformed utterance: {}", e);
                        continue;
                    }
                };
                store.push(utterance);
            }
            Some(message) = endings.next() => {
                let ended: SessionEndedMessage = match serde_json::from_slice(&message.payload) {
                    Ok(ended) => ended,
                    Err(e) => {
                        warn!("Ignoring malformed session end event: {}", e);
                        continue;
                    }
                };
                if store.remove_session(&ended.session_id) {
                    debug!("Dropped context buffer for session {}", ended.session_id);
                }
            }
            _ = shutdown.changed() => break,
            else => break,
        }
    }

    Ok(())
}
