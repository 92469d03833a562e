//! Events delivered to the consumer

mod event_types;
mod filter;

pub use event_types::GatewayEventType;
pub use filter::EventFilter;

use crate::protocol::Envelope;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Receiving end of a client's event stream; ends when the client shuts down
pub type EventReceiver = mpsc::Receiver<GatewayEvent>;

/// A decoded dispatch, in the order the server sent it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayEvent {
    pub name: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

impl GatewayEvent {
    #[must_use]
    pub fn kind(&self) -> Option<GatewayEventType> {
        self.name.parse().ok()
    }

    /// Deserialize the event payload into a concrete type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

impl From<Envelope> for GatewayEvent {
    fn from(envelope: Envelope) -> Self {
        Self {
            name: envelope.t.unwrap_or_default(),
            sequence: envelope.s,
            data: envelope.d,
        }
    }
}
