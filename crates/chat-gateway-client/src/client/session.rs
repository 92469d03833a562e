//! Session and sequence tracking
//!
//! Only the driver task mutates the session. The heartbeat supervisor and the
//! public client handle read it through snapshots.

use parking_lot::RwLock;

/// Resumable session identity plus the last sequence number seen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub session_id: Option<String>,
    pub sequence: Option<u64>,
    /// Endpoint the server asked us to resume against
    pub resume_url: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        self.session_id.is_some()
    }
}

/// Lock-guarded [`Session`]
#[derive(Debug, Default)]
pub struct SessionTracker {
    inner: RwLock<Session>,
}

impl SessionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.inner.read().clone()
    }

    /// Last sequence number, `None` before the first dispatch of a session
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.inner.read().sequence
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.read().session_id.clone()
    }

    /// Record a dispatch sequence number; returns false if it did not advance
    pub(crate) fn observe(&self, sequence: u64) -> bool {
        let mut session = self.inner.write();
        match session.sequence {
            Some(current) if current >= sequence => false,
            _ => {
                session.sequence = Some(sequence);
                true
            }
        }
    }

    /// Replace the session with the one a READY dispatch just established
    pub(crate) fn establish(
        &self,
        session_id: Option<String>,
        resume_url: Option<String>,
        sequence: Option<u64>,
    ) {
        *self.inner.write() = Session {
            session_id,
            sequence,
            resume_url,
        };
    }

    /// Forget the session; the next handshake will be an Identify
    pub(crate) fn reset(&self) {
        *self.inner.write() = Session::default();
    }
}
