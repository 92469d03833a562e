//! Packet codec
//!
//! Turns raw frames into [`Envelope`]s and control payloads into frames.

use super::envelope::Outgoing;
use super::{Envelope, OpCode};
use crate::error::{GatewayError, GatewayResult};
use serde::Serialize;

/// Decode one inbound frame
///
/// Malformed JSON and unknown operation codes both surface as
/// [`GatewayError::Decode`]; the caller discards the frame and keeps reading.
pub fn decode(frame: &[u8]) -> GatewayResult<Envelope> {
    serde_json::from_slice(frame).map_err(GatewayError::Decode)
}

/// Encode an outgoing control frame
///
/// Outgoing frames always carry `d`, even when it is `null`.
pub fn encode<T>(op: OpCode, payload: &T) -> GatewayResult<String>
where
    T: Serialize + ?Sized,
{
    serde_json::to_string(&Outgoing { op, d: payload })
        .map_err(|source| GatewayError::Encode { op, source })
}
