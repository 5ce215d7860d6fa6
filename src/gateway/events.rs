//! Bus announcements made by the gateway.
//!
//! Connection handling talks to the rest of the pipeline only through
//! this trait, so the admission and teardown paths can be exercised
//! without a live bus.

use anyhow::Result;
use async_trait::async_trait;

use crate::bus::{
    AudioFrameMessage, BusClient, SessionEndedMessage, SessionStartedMessage, Topics,
};

/// Events the gateway publishes as connections come and go.
#[async_trait]
pub trait GatewayEvents: Send + Sync {
    async fn session_started(&self, message: &SessionStartedMessage) -> Result<()>;
    async fn session_ended(&self, message: &SessionEndedMessage) -> Result<()>;
    async fn audio_frame(&self, message: &AudioFrameMessage) -> Result<()>;
}

/// Production sink: every event becomes a publish on its bus subject.
pub struct BusGatewayEvents {
    bus: BusClient,
    topics: Topics,
}

impl BusGatewayEvents {
    pub fn new(bus: BusClient, topics: Topics) -> Self {
        Self { bus, topics }
    }
}

#[async_trait]
impl GatewayEvents for BusGatewayEvents {
    async fn session_started(&self, message: &SessionStartedMessage) -> Result<()> {
        self.bus
            .publish_json(self.topics.session_started(), message)
            .await
    }

    async fn session_ended(&self, message: &SessionEndedMessage) -> Result<()> {
        self.bus
            .publish_json(self.topics.session_ended(), message)
            .await
    }

    async fn audio_frame(&self, message: &AudioFrameMessage) -> Result<()> {
        self.bus
            .publish_json(self.topics.audio_frame(&message.session_id), message)
            .await
    }
}
