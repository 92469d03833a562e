//! Heartbeat supervision
//!
//! One supervisor runs per connection lifetime. It is spawned when Hello
//! arrives and is cancelled and joined before the transport is reopened, so a
//! tick from an old connection can never reach a new one.

use super::cancel::until_cancelled;
use super::driver::Command;
use super::session::SessionTracker;
use crate::connection::Connection;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{codec, OpCode};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Round-trip latency of the most recent acknowledged heartbeat, shared across lifetimes
#[derive(Debug)]
pub struct HeartbeatStats {
    latency_ms: AtomicU64,
}

impl HeartbeatStats {
    const UNKNOWN: u64 = u64::MAX;

    #[must_use]
    pub fn new() -> Self {
        Self {
            latency_ms: AtomicU64::new(Self::UNKNOWN),
        }
    }

    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        match self.latency_ms.load(Ordering::Relaxed) {
            Self::UNKNOWN => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    fn record(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(Self::UNKNOWN - 1);
        self.latency_ms.store(ms, Ordering::Relaxed);
    }
}

impl Default for HeartbeatStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a heartbeat went out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeatKind {
    /// Scheduled by the supervisor
    Periodic,
    /// Answer to a server heartbeat request (op 1)
    Requested,
}

/// Ack bookkeeping for one connection lifetime
///
/// Written by the supervisor when a heartbeat goes out and by the read loop
/// when the ack comes back. The read loop also reports when it has stopped
/// reading because the driver is not taking its frames; an ack that may be
/// sitting unread behind that backlog does not count as missed.
#[derive(Debug)]
pub(crate) struct HeartbeatState {
    awaiting_ack: AtomicBool,
    sent: Mutex<Option<(Instant, BeatKind)>>,
    reader_stalled: AtomicBool,
    stalled_since_beat: AtomicBool,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatState {
    pub(crate) fn new(stats: Arc<HeartbeatStats>) -> Self {
        Self {
            awaiting_ack: AtomicBool::new(false),
            sent: Mutex::new(None),
            reader_stalled: AtomicBool::new(false),
            stalled_since_beat: AtomicBool::new(false),
            stats,
        }
    }

    pub(crate) fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack.load(Ordering::SeqCst)
    }

    fn mark_sent(&self, kind: BeatKind) {
        self.awaiting_ack.store(true, Ordering::SeqCst);
        *self.sent.lock() = Some((Instant::now(), kind));
        self.stalled_since_beat
            .store(self.reader_stalled.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub(crate) fn acknowledge(&self) {
        self.awaiting_ack.store(false, Ordering::SeqCst);
        if let Some((sent_at, _)) = self.sent.lock().take() {
            self.stats.record(sent_at.elapsed());
        }
    }

    /// Ack deadline of an outstanding server-requested beat
    fn requested_deadline(&self, interval: Duration) -> Option<Instant> {
        if !self.is_awaiting_ack() {
            return None;
        }
        match *self.sent.lock() {
            Some((sent_at, BeatKind::Requested)) => Some(sent_at + interval),
            _ => None,
        }
    }

    pub(crate) fn set_reader_stalled(&self, stalled: bool) {
        self.reader_stalled.store(stalled, Ordering::SeqCst);
        if stalled {
            self.stalled_since_beat.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn is_reader_stalled(&self) -> bool {
        self.reader_stalled.load(Ordering::SeqCst)
    }

    /// Whether the read loop stalled since the last check
    ///
    /// Stays true for one more check after the stall ends, giving the read
    /// loop an interval to reach the ack.
    fn take_stall_excuse(&self) -> bool {
        let stalled_now = self.reader_stalled.load(Ordering::SeqCst);
        self.stalled_since_beat.swap(stalled_now, Ordering::SeqCst)
    }
}

/// Send one heartbeat carrying the last known sequence
///
/// The ack flag is raised before the frame is written so a fast ack cannot be
/// lost.
pub(crate) async fn beat(
    connection: &dyn Connection,
    session: &SessionTracker,
    state: &HeartbeatState,
    kind: BeatKind,
) -> GatewayResult<()> {
    let frame = codec::encode(OpCode::Heartbeat, &session.sequence())?;
    state.mark_sent(kind);
    connection.send(frame).await.map_err(GatewayError::Send)
}

/// Periodic heartbeat task for one connection lifetime
pub(crate) struct HeartbeatSupervisor {
    pub generation: u64,
    pub interval: Duration,
    pub connection: Arc<dyn Connection>,
    pub session: Arc<SessionTracker>,
    pub state: Arc<HeartbeatState>,
    pub commands: mpsc::Sender<Command>,
    pub cancel: CancellationToken,
}

impl HeartbeatSupervisor {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        // First beat at a random point inside the first interval
        let first = self.interval.mul_f64(rand::thread_rng().gen::<f64>());
        let mut ticker = tokio::time::interval_at(Instant::now() + first, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            generation = self.generation,
            interval_ms = self.interval.as_millis() as u64,
            first_beat_ms = first.as_millis() as u64,
            "Heartbeat supervisor started"
        );

        loop {
            if until_cancelled(&self.cancel, ticker.tick()).await.is_none() {
                break;
            }

            // A server-requested beat gets a full interval for its ack
            if let Some(deadline) = self.state.requested_deadline(self.interval) {
                let waited =
                    until_cancelled(&self.cancel, tokio::time::sleep_until(deadline)).await;
                if waited.is_none() {
                    break;
                }
                ticker.reset();
            }

            if self.state.is_awaiting_ack() {
                if self.state.take_stall_excuse() {
                    tracing::debug!(
                        generation = self.generation,
                        still_stalled = self.state.is_reader_stalled(),
                        "Read loop stalled behind the consumer, ack check deferred"
                    );
                    continue;
                }
                tracing::warn!(
                    generation = self.generation,
                    "Connection zombied (heartbeat not ACKed)"
                );
                self.report(Command::Zombie {
                    generation: self.generation,
                })
                .await;
                break;
            }

            // The read loop reports the loss along with the close code
            if self.connection.is_disconnected() {
                tracing::debug!(generation = self.generation, "Transport gone, heartbeat skipped");
                break;
            }

            let sent = until_cancelled(
                &self.cancel,
                beat(
                    self.connection.as_ref(),
                    &self.session,
                    &self.state,
                    BeatKind::Periodic,
                ),
            )
            .await;

            match sent {
                None => break,
                Some(Ok(())) => tracing::trace!(generation = self.generation, "Heartbeat sent"),
                Some(Err(error)) => {
                    tracing::warn!(generation = self.generation, error = %error, "Failed to send heartbeat");
                    self.report(Command::TransportLost {
                        generation: self.generation,
                        error,
                    })
                    .await;
                    break;
                }
            }
        }

        tracing::debug!(generation = self.generation, "Heartbeat supervisor stopped");
    }

    async fn report(&self, command: Command) {
        // Dropped if the lifetime is already being torn down
        let _ = until_cancelled(&self.cancel, self.commands.send(command)).await;
    }
}
