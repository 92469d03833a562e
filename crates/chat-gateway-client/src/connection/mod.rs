//! Transport abstraction
//!
//! The client never talks to a socket directly. It drives an injected
//! [`Connection`], which lets tests script the server side frame by frame.

mod websocket;

pub use websocket::WebSocketConnection;

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The transport could not be established
    #[error("connect failed: {0}")]
    Connect(String),

    /// The transport is closed; `code` is the close frame's code when the peer sent one
    #[error("connection closed (code: {code:?})")]
    Closed { code: Option<u16> },

    /// The transport broke while reading or writing
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Close code sent by the peer, if any
    #[must_use]
    pub const fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed { code } => *code,
            _ => None,
        }
    }
}

/// A reusable, message-framed transport
///
/// One instance lives for the whole client and is opened again after every
/// close. Implementations must tolerate `send` and `receive` being called
/// concurrently from different tasks, and `close` must unblock a pending
/// `receive`.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Establish the transport; only valid while closed
    async fn open(&self, endpoint: &str, headers: &[(String, String)])
        -> Result<(), ConnectionError>;

    /// Write one text frame
    async fn send(&self, frame: String) -> Result<(), ConnectionError>;

    /// Wait for the next frame
    ///
    /// An error here is how the client learns the connection is gone. Must be
    /// cancel safe: a dropped call must not lose a frame.
    async fn receive(&self) -> Result<Vec<u8>, ConnectionError>;

    /// Best-effort graceful close; idempotent
    async fn close(&self) -> Result<(), ConnectionError>;

    /// Non-blocking liveness probe
    ///
    /// The heartbeat supervisor checks it before each beat and stops instead of
    /// writing to a dead socket; the failing `receive` reports the loss.
    fn is_disconnected(&self) -> bool;
}
