//! Consumer-side event filter

use dashmap::DashSet;

/// Names of dispatch events the consumer does not want forwarded
///
/// Ignored events are still sequenced and still drive the handshake; they
/// simply never reach the event stream.
#[derive(Debug, Default)]
pub struct EventFilter {
    ignored: DashSet<String>,
}

impl EventFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop forwarding `name`; returns false if it was already ignored
    pub fn ignore(&self, name: impl Into<String>) -> bool {
        self.ignored.insert(name.into())
    }

    /// Resume forwarding `name`; returns false if it was not ignored
    pub fn restore(&self, name: &str) -> bool {
        self.ignored.remove(name).is_some()
    }

    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ignored.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }
}
