//! Session ingress gateway
//!
//! This module owns the client-facing surface of the relay:
//! - GET /ws/:session_id - Duplex audio ingress (WebSocket)
//! - GET /sessions - List live sessions and connection counts
//! - GET /sessions/:session_id/context - Assembled context window
//! - GET /health - Health check
//!
//! Connections are validated against the session authority before the
//! upgrade, tracked in the in-process registry while open, and fed
//! finalized captions by the relay task.

mod events;
mod handlers;
pub mod registry;
mod relay;
mod routes;
mod state;
mod validator;
mod ws;

pub use events::{BusGatewayEvents, GatewayEvents};
pub use registry::{
    ClosedSession, ConnectionHandle, ConnectionRole, OutboundMessage, SessionRegistry,
};
pub use relay::{run_caption_relay, run_gateway_teardown};
pub use routes::create_router;
pub use state::GatewayState;
pub use validator::{HttpSessionValidator, SessionValidator, StaticValidator};
