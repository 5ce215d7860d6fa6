pub mod client;
pub mod messages;
pub mod topics;

pub use client::BusClient;
pub use messages::{
    AudioFrameMessage, SessionEndedMessage, SessionStartedMessage, TranscriptEventMessage,
};
pub use topics::Topics;
