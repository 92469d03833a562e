//! Gateway envelope
//!
//! The wire unit: `{"op": int, "s": int?, "t": string?, "d": any}`.

use super::OpCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded gateway message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: OpCode,

    /// Sequence number (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (dispatch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Operation-specific payload, `null` when absent
    #[serde(default)]
    pub d: Value,
}

impl Envelope {
    /// Build a dispatch envelope
    #[must_use]
    pub fn dispatch(event: impl Into<String>, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            s: Some(sequence),
            t: Some(event.into()),
            d: data,
        }
    }

    /// Build a control envelope with no sequence or event name
    #[must_use]
    pub fn control(op: OpCode, data: Value) -> Self {
        Self {
            op,
            s: None,
            t: None,
            d: data,
        }
    }

    /// Deserialize the payload into a concrete type
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.d)
    }

    /// The resumable flag of an Invalid Session envelope
    ///
    /// Anything other than a literal `true` means the session cannot be resumed.
    #[must_use]
    pub fn resumable(&self) -> Option<bool> {
        (self.op == OpCode::InvalidSession).then(|| self.d.as_bool().unwrap_or(false))
    }

    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Envelope(op={}", self.op)?;
        if let Some(t) = &self.t {
            write!(f, ", t={t}")?;
        }
        if let Some(s) = self.s {
            write!(f, ", s={s}")?;
        }
        write!(f, ")")
    }
}

/// Borrowed view used when encoding outgoing frames
#[derive(Serialize)]
pub(crate) struct Outgoing<'a, T: Serialize + ?Sized> {
    pub op: OpCode,
    pub d: &'a T,
}
