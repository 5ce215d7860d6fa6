pub mod bus;
pub mod config;
pub mod context;
pub mod gateway;
pub mod stt;
pub mod transcript;

pub use bus::{
    AudioFrameMessage, BusClient, SessionEndedMessage, SessionStartedMessage, Topics,
    TranscriptEventMessage,
};
pub use config::Config;
pub use context::{assemble, AssembleOptions, AssembledContext, ContextBuffer, ContextStore};
pub use gateway::{create_router, GatewayState, SessionRegistry, SessionValidator};
pub use stt::{ProviderConnection, SttProvider, SttSessionManager};
pub use transcript::{normalize_transcript, Utterance, UtteranceFinalizer, UtteranceMerger};
