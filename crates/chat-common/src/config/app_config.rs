//! Application configuration structs
//!
//! Loads configuration from environment variables, with a `.env` file as fallback.

use super::gateway_config::{
    Encoding, GatewayConfig, IdentityConfig, ReconnectConfig,
};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

fn default_app_name() -> String {
    "chat-gateway-client".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value does not parse
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = GatewayConfig::with_token(String::new());
        let identity = IdentityConfig::default();
        let reconnect = ReconnectConfig::default();

        let gateway = GatewayConfig {
            url: lookup("GATEWAY_URL").unwrap_or(defaults.url),
            version: parse_or(&lookup, "GATEWAY_VERSION", defaults.version)?,
            encoding: match lookup("GATEWAY_ENCODING") {
                Some(value) => Encoding::parse(&value)
                    .ok_or(ConfigError::InvalidValue("GATEWAY_ENCODING", value))?,
                None => defaults.encoding,
            },
            token: lookup("GATEWAY_TOKEN").ok_or(ConfigError::MissingVar("GATEWAY_TOKEN"))?,
            identity: IdentityConfig {
                os: lookup("GATEWAY_OS").unwrap_or(identity.os),
                browser: lookup("GATEWAY_BROWSER").unwrap_or(identity.browser),
                device: lookup("GATEWAY_DEVICE").unwrap_or(identity.device),
            },
            large_threshold: parse_or(&lookup, "GATEWAY_LARGE_THRESHOLD", defaults.large_threshold)?,
            intents: lookup("GATEWAY_INTENTS")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("GATEWAY_INTENTS", value))
                })
                .transpose()?,
            event_buffer: parse_or(&lookup, "GATEWAY_EVENT_BUFFER", defaults.event_buffer)?,
            shard_count: parse_or(&lookup, "GATEWAY_SHARD_COUNT", defaults.shard_count)?,
            identify_interval_ms: parse_or(
                &lookup,
                "GATEWAY_IDENTIFY_INTERVAL_MS",
                defaults.identify_interval_ms,
            )?,
            reconnect: ReconnectConfig {
                initial_delay_ms: parse_or(
                    &lookup,
                    "RECONNECT_INITIAL_DELAY_MS",
                    reconnect.initial_delay_ms,
                )?,
                max_delay_ms: parse_or(&lookup, "RECONNECT_MAX_DELAY_MS", reconnect.max_delay_ms)?,
                backoff_factor: parse_or(
                    &lookup,
                    "RECONNECT_BACKOFF_FACTOR",
                    reconnect.backoff_factor,
                )?,
                jitter: parse_or(&lookup, "RECONNECT_JITTER", reconnect.jitter)?,
            },
            user_agent: lookup("GATEWAY_USER_AGENT").unwrap_or(defaults.user_agent),
        };
        gateway.validate()?;

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .as_deref()
                    .and_then(Environment::parse)
                    .unwrap_or_default(),
            },
            gateway,
        })
    }
}

/// Parse `key` if set, otherwise fall back to `default`
fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, value)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
