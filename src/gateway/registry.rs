//! Live connection registry.
//!
//! Tracks which connections are attached to which sessions. The entry
//! for a session exists only while at least one connection is attached;
//! the registry mutates in-memory state only, lifecycle events are the
//! gateway's job.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionRole {
    Host,
    #[default]
    Participant,
}

/// Message queued to a connection's socket writer task.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(String),
    Close,
}

/// One live connection as the registry sees it.
pub struct ConnectionHandle {
    pub participant_id: String,
    pub role: ConnectionRole,
    /// Epoch milliseconds when the socket opened.
    pub connected_at: i64,
    pub outbound: mpsc::Sender<OutboundMessage>,
}

/// Teardown record returned when the last connection leaves.
#[derive(Debug, Clone)]
pub struct ClosedSession {
    pub session_id: String,
    /// Epoch milliseconds when the first connection joined.
    pub started_at: i64,
}

struct SessionEntry {
    started_at: i64,
    connections: HashMap<String, ConnectionHandle>,
    /// Set exactly when the entry leaves the map, so a handle obtained
    /// before removal cannot resurrect the session.
    closed: bool,
}

/// Session map with per-session serialization: the outer lock guards the
/// map shape only, every mutation of one session happens under that
/// session's own mutex so unrelated sessions never contend.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionEntry>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a connection, creating the session entry on first join.
    /// Returns true when this call created the session. A participant id
    /// rejoining replaces its previous handle.
    pub fn add_connection(&self, session_id: &str, handle: ConnectionHandle) -> bool {
        loop {
            let mut created = false;
            let entry = {
                if let Some(entry) = self.sessions.read().get(session_id) {
                    entry.clone()
                } else {
                    let mut sessions = self.sessions.write();
                    sessions
                        .entry(session_id.to_string())
                        .or_insert_with(|| {
                            created = true;
                            Arc::new(Mutex::new(SessionEntry {
                                started_at: chrono::Utc::now().timestamp_millis(),
                                connections: HashMap::new(),
                                closed: false,
                            }))
                        })
                        .clone()
                }
            };

            let mut guard = entry.lock();
            if guard.closed {
                // Raced with the last-leave teardown; take the next map
                // state.
                continue;
            }
            guard.connections.insert(handle.participant_id.clone(), handle);
            return created;
        }
    }

    /// Deregisters a connection. Removing the last one retires the entry
    /// and returns the teardown record; anything unknown is a no-op.
    pub fn remove_connection(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Option<ClosedSession> {
        let entry = self.sessions.read().get(session_id)?.clone();
        let mut guard = entry.lock();
        if guard.closed {
            return None;
        }
        guard.connections.remove(participant_id)?;
        if !guard.connections.is_empty() {
            return None;
        }

        guard.closed = true;
        let started_at = guard.started_at;
        drop(guard);
        self.sessions.write().remove(session_id);

        Some(ClosedSession {
            session_id: session_id.to_string(),
            started_at,
        })
    }

    /// Disconnects every connection and retires the entry. Used for
    /// server-side teardown when a session ends elsewhere.
    pub fn close_session(&self, session_id: &str) -> Option<ClosedSession> {
        let entry = self.sessions.read().get(session_id)?.clone();
        let mut guard = entry.lock();
        if guard.closed {
            return None;
        }

        guard.closed = true;
        for handle in guard.connections.values() {
            let _ = handle.outbound.try_send(OutboundMessage::Close);
        }
        guard.connections.clear();
        let started_at = guard.started_at;
        drop(guard);
        self.sessions.write().remove(session_id);

        Some(ClosedSession {
            session_id: session_id.to_string(),
            started_at,
        })
    }

    /// Best-effort fan-out to every connection in the session. Returns
    /// how many writer queues accepted the message.
    pub fn broadcast(&self, session_id: &str, message: &str) -> usize {
        let entry = match self.sessions.read().get(session_id) {
            Some(entry) => entry.clone(),
            None => return 0,
        };

        let guard = entry.lock();
        let mut delivered = 0;
        for handle in guard.connections.values() {
            match handle
                .outbound
                .try_send(OutboundMessage::Text(message.to_string()))
            {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!(
                        "Dropping outbound message for slow connection {}",
                        handle.participant_id
                    );
                }
            }
        }
        delivered
    }

    /// Best-effort delivery to one participant.
    pub fn send_to(&self, session_id: &str, participant_id: &str, message: &str) -> bool {
        let entry = match self.sessions.read().get(session_id) {
            Some(entry) => entry.clone(),
            None => return false,
        };

        let guard = entry.lock();
        match guard.connections.get(participant_id) {
            Some(handle) => handle
                .outbound
                .try_send(OutboundMessage::Text(message.to_string()))
                .is_ok(),
            None => false,
        }
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn connection_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .get(session_id)
            .map(|entry| entry.lock().connections.len())
            .unwrap_or(0)
    }

    pub fn total_connection_count(&self) -> usize {
        let entries: Vec<_> = self.sessions.read().values().cloned().collect();
        entries.iter().map(|entry| entry.lock().connections.len()).sum()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Start time of a live session, if present.
    pub fn session_started_at(&self, session_id: &str) -> Option<i64> {
        let entry = self.sessions.read().get(session_id)?.clone();
        let guard = entry.lock();
        Some(guard.started_at)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
