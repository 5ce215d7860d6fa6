//! Bus-to-socket feedback loops.
//!
//! Two background tasks close the loop between the pipeline and the
//! connected clients: the caption relay pushes finalized utterances back
//! down every socket in the session, and the teardown loop force-closes
//! sockets when a session ends elsewhere in the system.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{BusClient, SessionEndedMessage, Topics};
use crate::gateway::registry::SessionRegistry;
use crate::transcript::Utterance;

/// Relays finalized utterances to every connection in their session.
///
/// The bus payload is forwarded as-is, so clients see the same JSON the
/// rest of the system does. Sessions with no local connections are
/// skipped without logging; another gateway instance may own them.
pub async fn run_caption_relay(
    bus: BusClient,
    topics: Topics,
    registry: Arc<SessionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut utterances = bus.subscribe(topics.utterances_all()).await?;
    info!("Caption relay started");

    loop {
        tokio::select! {
            Some(message) = utterances.next() => {
                let utterance: Utterance = match serde_json::from_slice(&message.payload) {
                    Ok(utterance) => utterance,
                    Err(e) => {
                        warn!("Ignoring malformed utterance event: {}", e);
                        continue;
                    }
                };
                if !registry.has_session(&utterance.session_id) {
                    continue;
                }

                let text = String::from_utf8_lossy(&message.payload);
                let delivered = registry.broadcast(&utterance.session_id, &text);
                debug!(
                    "Relayed utterance {} to {} connections",
                    utterance.utterance_id, delivered
                );
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            else => break,
        }
    }

    info!("Caption relay stopped");
    Ok(())
}

/// Closes a session's sockets when its end is announced on the bus.
///
/// The common case (last connection leaves, gateway publishes the end
/// event itself) is a no-op here: the registry entry is already gone by
/// the time the event comes back around.
pub async fn run_gateway_teardown(
    bus: BusClient,
    topics: Topics,
    registry: Arc<SessionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut endings = bus.subscribe(topics.session_ended()).await?;
    info!("Gateway teardown loop started");

    loop {
        tokio::select! {
            Some(message) = endings.next() => {
                let ended: SessionEndedMessage = match serde_json::from_slice(&message.payload) {
                    Ok(ended) => ended,
                    Err(e) => {
                        warn!("Ignoring malformed session end event: {}", e);
                        continue;
                    }
                };
                if registry.close_session(&ended.session_id).is_some() {
                    info!(
                        "Closed remaining connections for ended session {}",
                        ended.session_id
                    );
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            else => break,
        }
    }

    info!("Gateway teardown loop stopped");
    Ok(())
}
