use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::context::ContextStore;
use crate::gateway::events::GatewayEvents;
use crate::gateway::registry::SessionRegistry;
use crate::gateway::validator::SessionValidator;

/// Shared state for HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub validator: Arc<dyn SessionValidator>,
    pub events: Arc<dyn GatewayEvents>,
    pub settings: GatewayConfig,
    pub context: Arc<ContextStore>,
}
