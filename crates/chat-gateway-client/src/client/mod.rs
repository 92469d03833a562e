//! Gateway client
//!
//! [`GatewayClient`] is a cheap handle over a background driver task. Build one
//! with [`GatewayClient::builder`], call [`connect`](GatewayClient::connect),
//! then read dispatches from the returned [`EventReceiver`].

mod backoff;
mod cancel;
mod driver;
mod heartbeat;
mod reader;
mod session;
mod settings;
mod state;

pub use backoff::ReconnectBackoff;
pub use heartbeat::HeartbeatStats;
pub use session::{Session, SessionTracker};
pub use state::{ClientState, StateTransition};

use crate::connection::{Connection, WebSocketConnection};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{EventFilter, EventReceiver};
use crate::identify::IdentifyQueue;
use crate::protocol::PresenceUpdatePayload;
use chat_common::GatewayConfig;
use driver::{Command, Driver, DriverParts};
use settings::ClientSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Commands queued for the driver before senders block
const COMMAND_BUFFER_SIZE: usize = 64;

/// Transition notifications kept for slow side-channel subscribers
const TRANSITION_BUFFER_SIZE: usize = 32;

/// Handle to one gateway connection (one shard)
pub struct GatewayClient {
    shard_id: u32,
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    state: watch::Receiver<ClientState>,
    transitions: broadcast::Sender<StateTransition>,
    session: Arc<SessionTracker>,
    filter: Arc<EventFilter>,
    stats: Arc<HeartbeatStats>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayClient {
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayClientBuilder {
        GatewayClientBuilder::new(config)
    }

    /// Open the connection
    ///
    /// Returns once the transport is open; the handshake continues in the
    /// background. A no-op unless the client is `Disconnected`. An open failure
    /// is returned to the caller, who decides whether to retry.
    pub async fn connect(&self) -> GatewayResult<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(GatewayError::Shutdown);
        }
        if !state.is_idle() {
            tracing::debug!(shard = self.shard_id, state = %state, "connect() ignored, client already active");
            return Ok(());
        }
        let (reply, result) = oneshot::channel();
        self.request(Command::Connect { reply }, result).await
    }

    /// Send a presence update; only valid while `Ready`
    pub async fn update_presence(&self, payload: PresenceUpdatePayload) -> GatewayResult<()> {
        if !payload.is_valid_status() {
            return Err(GatewayError::Config(format!(
                "invalid status: {}, must be one of online, idle, dnd, invisible, offline",
                payload.status
            )));
        }
        let state = self.state();
        if state != ClientState::Ready {
            return Err(GatewayError::NotReady(state));
        }
        let (reply, result) = oneshot::channel();
        self.request(Command::UpdatePresence { payload, reply }, result)
            .await
    }

    async fn request(
        &self,
        command: Command,
        result: oneshot::Receiver<GatewayResult<()>>,
    ) -> GatewayResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| GatewayError::Shutdown)?;
        result.await.map_err(|_| GatewayError::Shutdown)?
    }

    /// Stop the client and wait for its tasks to finish
    ///
    /// Safe to call from any state and more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::warn!(shard = self.shard_id, error = %e, "Gateway driver ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Watch the current state
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state.clone()
    }

    /// Every state transition, in order, from now on
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    /// Wait until the client reaches `target`, or the client stops
    pub async fn wait_for_state(&self, target: ClientState) -> GatewayResult<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map_err(|_| GatewayError::Shutdown)?;
        if *reached == target {
            Ok(())
        } else {
            Err(GatewayError::Shutdown)
        }
    }

    #[must_use]
    pub fn session(&self) -> Session {
        self.session.snapshot()
    }

    /// Last sequence number seen
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.session.sequence()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session.session_id()
    }

    /// Round-trip time of the last acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.stats.latency()
    }

    /// Stop forwarding events named `name`
    pub fn ignore_event(&self, name: impl Into<String>) -> bool {
        self.filter.ignore(name)
    }

    /// Forward events named `name` again
    pub fn restore_event(&self, name: &str) -> bool {
        self.filter.restore(name)
    }

    #[must_use]
    pub fn ignored_event_count(&self) -> usize {
        self.filter.len()
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("shard_id", &self.shard_id)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish()
    }
}

/// Builder for [`GatewayClient`]
pub struct GatewayClientBuilder {
    config: GatewayConfig,
    shard: Option<[u32; 2]>,
    connection: Option<Arc<dyn Connection>>,
    identify_queue: Option<IdentifyQueue>,
    shutdown: Option<CancellationToken>,
    backoff: Option<ReconnectBackoff>,
}

impl GatewayClientBuilder {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            shard: None,
            connection: None,
            identify_queue: None,
            shutdown: None,
            backoff: None,
        }
    }

    /// Run as shard `id` of `count`
    #[must_use]
    pub fn shard(mut self, id: u32, count: u32) -> Self {
        self.shard = Some([id, count]);
        self
    }

    /// Transport to use instead of a [`WebSocketConnection`]
    #[must_use]
    pub fn connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Shared identify admission channel
    #[must_use]
    pub fn identify_queue(mut self, queue: IdentifyQueue) -> Self {
        self.identify_queue = Some(queue);
        self
    }

    /// Process-wide shutdown signal; the client also stops when it fires
    #[must_use]
    pub fn shutdown_signal(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Override the backoff taken from the configuration
    #[must_use]
    pub fn backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Validate the configuration and spawn the driver
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> GatewayResult<(GatewayClient, EventReceiver)> {
        self.config.validate()?;
        if let Some([id, count]) = self.shard {
            if id >= count {
                return Err(GatewayError::Config(format!(
                    "shard id {id} out of range for {count} shards"
                )));
            }
        }

        let settings = ClientSettings::new(&self.config, self.shard);
        let shard_id = settings.shard_id();
        let shutdown = self
            .shutdown
            .map_or_else(CancellationToken::new, |parent| parent.child_token());
        let connection = self
            .connection
            .unwrap_or_else(|| Arc::new(WebSocketConnection::new()));
        let backoff = self
            .backoff
            .unwrap_or_else(|| ReconnectBackoff::from(&self.config.reconnect));

        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (events_tx, events) = mpsc::channel(self.config.event_buffer);
        let (state_tx, state) = watch::channel(ClientState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER_SIZE);
        let session = Arc::new(SessionTracker::new());
        let filter = Arc::new(EventFilter::new());
        let stats = Arc::new(HeartbeatStats::new());

        let driver = Driver::new(DriverParts {
            settings,
            connection,
            identify_queue: self.identify_queue,
            backoff,
            commands_tx: commands_tx.clone(),
            commands,
            events: events_tx,
            filter: filter.clone(),
            session: session.clone(),
            stats: stats.clone(),
            state_tx,
            transitions: transitions.clone(),
            shutdown: shutdown.clone(),
        });
        let handle = tokio::spawn(driver.run());

        tracing::debug!(shard = shard_id, "Gateway client built");

        let client = GatewayClient {
            shard_id,
            commands: commands_tx,
            shutdown,
            state,
            transitions,
            session,
            filter,
            stats,
            driver: Mutex::new(Some(handle)),
        };
        Ok((client, events))
    }
}
