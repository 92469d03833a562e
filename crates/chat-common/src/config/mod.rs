//! Configuration structs

mod app_config;
mod gateway_config;

pub use app_config::{AppConfig, AppSettings, ConfigError, Environment};
pub use gateway_config::{Encoding, GatewayConfig, IdentityConfig, ReconnectConfig};
