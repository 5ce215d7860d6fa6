use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use serde::Serialize;
use tracing::info;

/// Thin wrapper around the NATS client. All publishing goes through
/// `publish_json`; callers decide whether a failure is fatal or shed.
#[derive(Clone)]
pub struct BusClient {
    client: Client,
}

impl BusClient {
    /// Connect to the bus. Startup aborts if this fails.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, subject: String, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message).context("Failed to serialize bus message")?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", subject))?;

        Ok(())
    }

    pub async fn subscribe(&self, subject: String) -> Result<Subscriber> {
        info!("Subscribing to {}", subject);

        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))?;

        Ok(subscriber)
    }

    pub async fn flush(&self) -> Result<()> {
        self.client.flush().await.context("Failed to flush NATS client")?;
        Ok(())
    }

    /// Flush outstanding publishes and drop the connection.
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.flush().await?;
        Ok(())
    }
}
