//! # chat-gateway-client
//!
//! Client for a JSON-over-WebSocket gateway protocol: handshake, heartbeat
//! supervision, session resume and cross-client identify throttling.
//!
//! ```no_run
//! use chat_common::GatewayConfig;
//! use chat_gateway_client::GatewayClient;
//!
//! # async fn demo() -> chat_gateway_client::GatewayResult<()> {
//! let (client, mut events) = GatewayClient::builder(GatewayConfig::with_token("token")).build()?;
//! client.connect().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{} #{:?}", event.name, event.sequence);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod identify;
pub mod protocol;

pub use client::{
    ClientState, GatewayClient, GatewayClientBuilder, HeartbeatStats, ReconnectBackoff, Session,
    SessionTracker, StateTransition,
};
pub use connection::{Connection, ConnectionError, WebSocketConnection};
pub use error::{GatewayError, GatewayResult};
pub use events::{EventFilter, EventReceiver, GatewayEvent, GatewayEventType};
pub use identify::{IdentifyCoordinator, IdentifyQueue, IdentifyRequest, IdentifyToken};
pub use protocol::{CloseCode, Envelope, OpCode, PresenceUpdatePayload};
