//! Client lifecycle states

use std::fmt;

/// Where the client is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientState {
    /// No transport; initial state and where permanent failures park the client
    #[default]
    Disconnected,
    /// Opening the transport for a fresh session
    Connecting,
    /// Transport open, waiting for the server's Hello
    AwaitingHello,
    /// Waiting for an identify grant, or for READY after sending Identify
    Identifying,
    /// Resume sent, waiting for RESUMED
    Resuming,
    /// Session established, dispatches flowing
    Ready,
    /// Transport torn down, reopening to resume
    Reconnecting,
    /// Terminal
    ShuttingDown,
}

impl ClientState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::AwaitingHello => "AwaitingHello",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
            Self::Ready => "Ready",
            Self::Reconnecting => "Reconnecting",
            Self::ShuttingDown => "ShuttingDown",
        }
    }

    /// States in which a handshake is in flight or complete, so dispatches are accepted
    #[must_use]
    pub const fn accepts_dispatch(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::Ready)
    }

    /// Whether `connect()` has anything to do from here
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Disconnected)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ShuttingDown)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state change, as published on the transition side channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ClientState,
    pub to: ClientState,
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
