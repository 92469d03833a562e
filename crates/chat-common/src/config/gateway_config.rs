//! Gateway client configuration

use super::ConfigError;
use serde::Deserialize;

/// Wire encoding requested from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
}

impl Encoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
        }
    }

    /// Parse an encoding name; only `json` is supported
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Client properties sent with Identify
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_client_name")]
    pub browser: String,
    #[serde(default = "default_client_name")]
    pub device: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            os: default_os(),
            browser: default_client_name(),
            device: default_client_name(),
        }
    }
}

/// Reconnect backoff settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Fraction of the delay added as random jitter (0.0 to 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
        }
    }
}

/// Gateway client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default)]
    pub encoding: Encoding,
    pub token: String,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    #[serde(default)]
    pub intents: Option<u64>,
    /// Capacity of the event stream handed to the consumer
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
    /// Minimum time between two identifies across the process
    #[serde(default = "default_identify_interval_ms")]
    pub identify_interval_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl GatewayConfig {
    /// Default configuration with the given token
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            url: default_url(),
            version: default_version(),
            encoding: Encoding::default(),
            token: token.into(),
            identity: IdentityConfig::default(),
            large_threshold: default_large_threshold(),
            intents: None,
            event_buffer: default_event_buffer(),
            shard_count: default_shard_count(),
            identify_interval_ms: default_identify_interval_ms(),
            reconnect: ReconnectConfig::default(),
            user_agent: default_user_agent(),
        }
    }

    /// Check the values a client cannot work without
    ///
    /// # Errors
    /// Returns the first invalid field found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingVar("GATEWAY_TOKEN"));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_URL",
                format!("{} is not a ws:// or wss:// URL", self.url),
            ));
        }
        if !(50..=250).contains(&self.large_threshold) {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_LARGE_THRESHOLD",
                format!("{} is outside 50..=250", self.large_threshold),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_EVENT_BUFFER",
                "must be at least 1".to_string(),
            ));
        }
        if self.shard_count == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_SHARD_COUNT",
                "must be at least 1".to_string(),
            ));
        }

        let reconnect = &self.reconnect;
        if reconnect.backoff_factor < 1.0 || !reconnect.backoff_factor.is_finite() {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_BACKOFF_FACTOR",
                format!("{} is below 1.0", reconnect.backoff_factor),
            ));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_JITTER",
                format!("{} is outside 0.0..=1.0", reconnect.jitter),
            ));
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(ConfigError::InvalidValue(
                "RECONNECT_MAX_DELAY_MS",
                "must not be below RECONNECT_INITIAL_DELAY_MS".to_string(),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_version() -> u8 {
    10
}

fn default_os() -> String {
    std::env::consts::OS.to_string()
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_large_threshold() -> u32 {
    250
}

fn default_event_buffer() -> usize {
    64
}

fn default_shard_count() -> u32 {
    1
}

fn default_identify_interval_ms() -> u64 {
    5000
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_user_agent() -> String {
    format!(
        "DiscordBot ({}, {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}
