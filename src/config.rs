use anyhow::{bail, Context, Result};
use config::{Environment, File};
use serde::Deserialize;

/// Service configuration, loaded from an optional TOML file layered with
/// `MEETING_RELAY__` environment variables (e.g. `MEETING_RELAY__BUS__URL`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_url")]
    pub url: String,
    /// Subject prefix for every topic this service publishes or consumes.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Largest binary frame accepted over the WebSocket, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Connections with no inbound traffic for this long are closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Base URL of the session authority. When unset the gateway admits
    /// every connection and warns at startup.
    #[serde(default)]
    pub validation_url: Option<String>,
    /// Timeout for a single validation request.
    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Audio frames queued per session before the oldest are shed.
    #[serde(default = "default_audio_queue")]
    pub audio_queue: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptConfig {
    /// Partial transcripts retained per session between finals.
    #[serde(default = "default_max_partials")]
    pub max_partials: usize,
    /// Finals from the same speaker within this gap are merged.
    #[serde(default = "default_merge_gap_ms")]
    pub merge_gap_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_context_capacity")]
    pub capacity: usize,
    #[serde(default = "default_context_max_age_ms")]
    pub max_age_ms: u64,
    #[serde(default = "default_max_characters")]
    pub max_characters: usize,
    #[serde(default = "default_reserved_characters")]
    pub reserved_characters: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_bus_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_namespace() -> String {
    "meet".to_string()
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_validation_timeout_ms() -> u64 {
    2_000
}

fn default_provider_url() -> String {
    "http://localhost:9090/v1/stream".to_string()
}

fn default_max_sessions() -> usize {
    64
}

fn default_reconnect_base_ms() -> u64 {
    500
}

fn default_reconnect_cap_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_audio_queue() -> usize {
    256
}

fn default_max_partials() -> usize {
    50
}

fn default_merge_gap_ms() -> u64 {
    5_000
}

fn default_context_capacity() -> usize {
    100
}

fn default_context_max_age_ms() -> u64 {
    120_000
}

fn default_max_characters() -> usize {
    4_000
}

fn default_reserved_characters() -> usize {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: default_bus_url(),
            namespace: default_namespace(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            idle_timeout_ms: default_idle_timeout_ms(),
            validation_url: None,
            validation_timeout_ms: default_validation_timeout_ms(),
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider_url: default_provider_url(),
            api_key: None,
            max_sessions: default_max_sessions(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            audio_queue: default_audio_queue(),
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            max_partials: default_max_partials(),
            merge_gap_ms: default_merge_gap_ms(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            capacity: default_context_capacity(),
            max_age_ms: default_context_max_age_ms(),
            max_characters: default_max_characters(),
            reserved_characters: default_reserved_characters(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (extension-less, optional) layered
    /// with `MEETING_RELAY__` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("MEETING_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to build configuration")?;

        let cfg: Config = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway.max_frame_bytes == 0 {
            bail!("gateway.max_frame_bytes must be greater than zero");
        }
        if self.stt.max_sessions == 0 {
            bail!("stt.max_sessions must be greater than zero");
        }
        if self.stt.audio_queue == 0 {
            bail!("stt.audio_queue must be greater than zero");
        }
        if self.stt.reconnect_base_ms == 0 {
            bail!("stt.reconnect_base_ms must be greater than zero");
        }
        if self.transcript.max_partials == 0 {
            bail!("transcript.max_partials must be greater than zero");
        }
        if self.context.capacity == 0 {
            bail!("context.capacity must be greater than zero");
        }
        if self.context.reserved_characters >= self.context.max_characters {
            bail!("context.reserved_characters must be smaller than context.max_characters");
        }
        Ok(())
    }
}
