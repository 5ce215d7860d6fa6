//! Session validation against the external authority.
//!
//! The gateway admits a connection only when the authority explicitly
//! says the session is valid. An unreachable or erroring authority is
//! indistinguishable from "invalid": the caller fails closed.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[async_trait::async_trait]
pub trait SessionValidator: Send + Sync {
    /// True only on an explicit positive answer from the authority.
    async fn validate(&self, session_id: &str) -> Result<bool>;
}

/// Validates against an HTTP authority: `GET {base_url}/{session_id}`
/// must answer 2xx with `{"valid": true}`.
pub struct HttpSessionValidator {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    valid: bool,
}

impl HttpSessionValidator {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("Failed to build session validator HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl SessionValidator for HttpSessionValidator {
    async fn validate(&self, session_id: &str) -> Result<bool> {
        let url = format!("{}/{}", self.base_url, session_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Session validation request failed")?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let body: ValidationResponse = response
            .json()
            .await
            .context("Malformed session validation response")?;
        Ok(body.valid)
    }
}

/// Fixed-answer validator. The permissive form backs deployments with no
/// authority configured; the denying form exists for tests.
pub struct StaticValidator {
    allow: bool,
}

impl StaticValidator {
    pub fn allow_all() -> Self {
        Self { allow: true }
    }

    pub fn deny_all() -> Self {
        Self { allow: false }
    }
}

#[async_trait::async_trait]
impl SessionValidator for StaticValidator {
    async fn validate(&self, _session_id: &str) -> Result<bool> {
        Ok(self.allow)
    }
}
