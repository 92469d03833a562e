//! Identify admission
//!
//! Every client in a process shares one identify rate limit. Before sending
//! Identify a client puts an [`IdentifyRequest`] on the shared [`IdentifyQueue`]
//! and waits for an [`IdentifyToken`]; once Identify is on the wire it calls
//! [`IdentifyToken::release`] so the coordinator can serve the next client.
//! Resume is never throttled.

mod coordinator;

pub use coordinator::IdentifyCoordinator;

use tokio::sync::{mpsc, oneshot};

/// Sending half of the shared admission channel
pub type IdentifyQueue = mpsc::Sender<IdentifyRequest>;

/// A client asking for its turn to identify
#[derive(Debug)]
pub struct IdentifyRequest {
    shard_id: u32,
    reply: oneshot::Sender<IdentifyToken>,
}

impl IdentifyRequest {
    #[must_use]
    pub fn new(shard_id: u32, reply: oneshot::Sender<IdentifyToken>) -> Self {
        Self { shard_id, reply }
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Hand the requester its token
    ///
    /// Returns the token back if the requester stopped waiting.
    pub fn grant(self, token: IdentifyToken) -> Result<(), IdentifyToken> {
        self.reply.send(token)
    }
}

/// Permission to send exactly one Identify
///
/// `release` consumes the token, so it can be signalled at most once. Dropping
/// an unreleased token tells the coordinator the grant was abandoned.
#[derive(Debug)]
pub struct IdentifyToken {
    key: u64,
    release: oneshot::Sender<()>,
}

impl IdentifyToken {
    #[must_use]
    pub fn new(key: u64, release: oneshot::Sender<()>) -> Self {
        Self { key, release }
    }

    #[must_use]
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Signal that Identify has been sent
    pub fn release(self) {
        if self.release.send(()).is_err() {
            tracing::debug!(key = self.key, "Identify coordinator stopped before release");
        }
    }
}
