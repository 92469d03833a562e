//! Client error types

use crate::client::ClientState;
use crate::connection::ConnectionError;
use crate::protocol::{CloseCode, OpCode};
use thiserror::Error;

/// Errors raised inside the gateway client
///
/// Only `connect()` and `update_presence()` hand these to a caller. Everything
/// else is handled internally by reconnecting or by discarding a frame.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport could not be opened
    #[error("Failed to open gateway connection: {0}")]
    Connect(#[source] ConnectionError),

    /// Inbound frame is not a valid envelope
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Outgoing payload could not be serialized
    #[error("Failed to encode {op} payload: {source}")]
    Encode {
        op: OpCode,
        #[source]
        source: serde_json::Error,
    },

    /// Outbound frame could not be written
    #[error("Failed to send frame: {0}")]
    Send(#[source] ConnectionError),

    /// Receive failed; the connection is gone
    #[error("Failed to read frame: {0}")]
    Read(#[source] ConnectionError),

    /// Operation not valid in the current state
    #[error("Unexpected {op} while {state}")]
    ProtocolViolation { op: OpCode, state: ClientState },

    /// Heartbeat went unacknowledged for a full interval
    #[error("Heartbeat not acknowledged, connection zombied")]
    ZombieConnection,

    /// Identify coordinator dropped its end of the channel
    #[error("Identify coordinator is unavailable")]
    AdmissionClosed,

    /// Operation requires a Ready session
    #[error("Client is not ready (state: {0})")]
    NotReady(ClientState),

    /// Invalid client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Client is shutting down
    #[error("Client is shutting down")]
    Shutdown,
}

impl GatewayError {
    /// Close code the server attached to the frame that ended the connection
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Read(e) | Self::Send(e) => e.close_code().and_then(CloseCode::from_u16),
            _ => None,
        }
    }

    /// Whether this error means the current connection is unusable
    #[must_use]
    pub fn triggers_reconnect(&self) -> bool {
        match self {
            Self::Send(_) | Self::Read(_) | Self::ZombieConnection | Self::AdmissionClosed => {
                self.close_code().map_or(true, CloseCode::should_reconnect)
            }
            _ => false,
        }
    }
}

impl From<chat_common::ConfigError> for GatewayError {
    fn from(err: chat_common::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Gateway client result type
pub type GatewayResult<T> = Result<T, GatewayError>;
