pub mod connection;
pub mod manager;
pub mod provider;

pub use connection::{ConnectionConfig, ConnectionState, ProviderConnection};
pub use manager::{run_engine, SttManagerConfig, SttSessionManager};
pub use provider::{
    CloseReason, HttpProviderConfig, HttpSttProvider, ProviderEvent, ProviderSession,
    ProviderTranscript, ScriptedProvider, ScriptedSession, SttProvider,
};
