//! Gateway state machine
//!
//! The driver is the only task that mutates [`ClientState`] or the session.
//! The read loop, the heartbeat supervisor and the public handle talk to it
//! through [`Command`]s. Messages from a previous connection lifetime carry an
//! old generation number and are dropped. Heartbeat acks are settled by the
//! read loop and never reach the driver.

use super::backoff::ReconnectBackoff;
use super::cancel::until_cancelled;
use super::heartbeat::{self, BeatKind, HeartbeatState, HeartbeatStats, HeartbeatSupervisor};
use super::reader::Reader;
use super::session::SessionTracker;
use super::settings::ClientSettings;
use super::state::{ClientState, StateTransition};
use crate::connection::Connection;
use crate::error::{GatewayError, GatewayResult};
use crate::events::{EventFilter, GatewayEvent, GatewayEventType};
use crate::identify::{IdentifyQueue, IdentifyRequest, IdentifyToken};
use crate::protocol::{codec, Envelope, HelloPayload, OpCode, PresenceUpdatePayload, ReadyPayload};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bound on how long a graceful transport close may take
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive protocol violations tolerated on one connection
const MAX_PROTOCOL_VIOLATIONS: u32 = 8;

/// Messages into the driver
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<GatewayResult<()>>,
    },
    UpdatePresence {
        payload: PresenceUpdatePayload,
        reply: oneshot::Sender<GatewayResult<()>>,
    },
    Inbound {
        generation: u64,
        envelope: Envelope,
    },
    TransportLost {
        generation: u64,
        error: GatewayError,
    },
    Zombie {
        generation: u64,
    },
}

/// How a reconnect treats the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconnect {
    /// Keep the session and resume it
    Resume,
    /// Drop the session and identify from scratch
    Fresh,
}

/// Tasks and bookkeeping for one open transport
struct Lifetime {
    generation: u64,
    cancel: CancellationToken,
    heartbeat: Arc<HeartbeatState>,
    reader: JoinHandle<()>,
    supervisor: Option<JoinHandle<()>>,
    violations: u32,
}

/// Shared handles the driver is built from
pub(crate) struct DriverParts {
    pub settings: ClientSettings,
    pub connection: Arc<dyn Connection>,
    pub identify_queue: Option<IdentifyQueue>,
    pub backoff: ReconnectBackoff,
    pub commands_tx: mpsc::Sender<Command>,
    pub commands: mpsc::Receiver<Command>,
    pub events: mpsc::Sender<GatewayEvent>,
    pub filter: Arc<EventFilter>,
    pub session: Arc<SessionTracker>,
    pub stats: Arc<HeartbeatStats>,
    pub state_tx: watch::Sender<ClientState>,
    pub transitions: broadcast::Sender<StateTransition>,
    pub shutdown: CancellationToken,
}

pub(crate) struct Driver {
    settings: ClientSettings,
    connection: Arc<dyn Connection>,
    identify_queue: Option<IdentifyQueue>,
    backoff: ReconnectBackoff,
    commands_tx: mpsc::Sender<Command>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<GatewayEvent>,
    filter: Arc<EventFilter>,
    session: Arc<SessionTracker>,
    stats: Arc<HeartbeatStats>,
    state: ClientState,
    state_tx: watch::Sender<ClientState>,
    transitions: broadcast::Sender<StateTransition>,
    shutdown: CancellationToken,
    generation: u64,
    lifetime: Option<Lifetime>,
}

impl Driver {
    pub(crate) fn new(parts: DriverParts) -> Self {
        Self {
            settings: parts.settings,
            connection: parts.connection,
            identify_queue: parts.identify_queue,
            backoff: parts.backoff,
            commands_tx: parts.commands_tx,
            commands: parts.commands,
            events: parts.events,
            filter: parts.filter,
            session: parts.session,
            stats: parts.stats,
            state: ClientState::Disconnected,
            state_tx: parts.state_tx,
            transitions: parts.transitions,
            shutdown: parts.shutdown,
            generation: 0,
            lifetime: None,
        }
    }

    fn shard_id(&self) -> u32 {
        self.settings.shard_id()
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(shard = self.shard_id(), "Gateway driver started");

        loop {
            let command = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }

        self.transition(ClientState::ShuttingDown);
        self.teardown().await;
        tracing::info!(shard = self.shard_id(), "Gateway client stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::UpdatePresence { payload, reply } => {
                let result = if self.state == ClientState::Ready {
                    self.send(OpCode::StatusUpdate, &payload).await
                } else {
                    Err(GatewayError::NotReady(self.state))
                };
                let lost = matches!(result, Err(GatewayError::Send(_)));
                let _ = reply.send(result);
                if lost {
                    self.reconnect(Reconnect::Resume).await;
                }
            }
            Command::Inbound {
                generation,
                envelope,
            } if self.is_current(generation) => self.handle_envelope(envelope).await,
            Command::TransportLost { generation, error } if self.is_current(generation) => {
                self.handle_transport_lost(error).await;
            }
            Command::Zombie { generation } if self.is_current(generation) => {
                tracing::warn!(
                    shard = self.shard_id(),
                    error = %GatewayError::ZombieConnection,
                    "Forcing reconnect"
                );
                self.reconnect(Reconnect::Resume).await;
            }
            Command::Inbound { generation, .. }
            | Command::TransportLost { generation, .. }
            | Command::Zombie { generation } => {
                tracing::trace!(generation, "Ignoring message from a previous connection");
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lifetime
            .as_ref()
            .is_some_and(|lifetime| lifetime.generation == generation)
    }

    fn transition(&mut self, next: ClientState) {
        let previous = self.state;
        if previous == next || previous.is_terminal() {
            return;
        }
        self.state = next;
        self.state_tx.send_replace(next);
        let _ = self.transitions.send(StateTransition {
            from: previous,
            to: next,
        });
        tracing::debug!(shard = self.shard_id(), from = %previous, to = %next, "State changed");
    }

    // === Transport lifecycle ===

    async fn connect(&mut self) -> GatewayResult<()> {
        if self.state.is_terminal() {
            return Err(GatewayError::Shutdown);
        }
        if !self.state.is_idle() {
            tracing::debug!(state = %self.state, "connect() ignored, client already active");
            return Ok(());
        }

        self.transition(ClientState::Connecting);
        match self.open().await {
            Ok(()) => {
                self.transition(ClientState::AwaitingHello);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(shard = self.shard_id(), error = %error, "Failed to connect");
                self.transition(ClientState::Disconnected);
                Err(error)
            }
        }
    }

    /// Open the transport and start a read loop for the new lifetime
    async fn open(&mut self) -> GatewayResult<()> {
        let endpoint = self.settings.endpoint(&self.session.snapshot());
        let opened = until_cancelled(
            &self.shutdown,
            self.connection.open(&endpoint, &self.settings.headers),
        )
        .await;
        match opened {
            None => return Err(GatewayError::Shutdown),
            Some(Err(error)) => return Err(GatewayError::Connect(error)),
            Some(Ok(())) => {}
        }

        self.generation += 1;
        let cancel = self.shutdown.child_token();
        let heartbeat = Arc::new(HeartbeatState::new(self.stats.clone()));
        let reader = Reader {
            generation: self.generation,
            connection: self.connection.clone(),
            heartbeat: heartbeat.clone(),
            commands: self.commands_tx.clone(),
            cancel: cancel.clone(),
        };

        self.lifetime = Some(Lifetime {
            generation: self.generation,
            cancel,
            heartbeat,
            reader: tokio::spawn(reader.run()),
            supervisor: None,
            violations: 0,
        });

        tracing::info!(
            shard = self.shard_id(),
            generation = self.generation,
            endpoint = %endpoint,
            "Gateway connection opened"
        );
        Ok(())
    }

    /// Stop the lifetime's tasks and close the transport
    ///
    /// Both tasks are joined before returning, so nothing from this lifetime can
    /// touch the transport once it is reopened.
    async fn teardown(&mut self) {
        let Some(lifetime) = self.lifetime.take() else {
            return;
        };
        lifetime.cancel.cancel();

        match tokio::time::timeout(CLOSE_TIMEOUT, self.connection.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::debug!(error = %error, "Transport close reported an error"),
            Err(_) => tracing::warn!("Transport close timed out"),
        }

        if let Err(error) = lifetime.reader.await {
            tracing::warn!(error = %error, "Read loop ended abnormally");
        }
        if let Some(supervisor) = lifetime.supervisor {
            if let Err(error) = supervisor.await {
                tracing::warn!(error = %error, "Heartbeat supervisor ended abnormally");
            }
        }

        tracing::debug!(generation = lifetime.generation, "Connection torn down");
    }

    /// Tear down and reopen until it works or shutdown fires
    ///
    /// The first attempt is immediate; later attempts follow the backoff.
    async fn reconnect(&mut self, mode: Reconnect) {
        match mode {
            Reconnect::Resume => self.transition(ClientState::Reconnecting),
            Reconnect::Fresh => self.session.reset(),
        }
        self.teardown().await;
        if mode == Reconnect::Fresh {
            self.transition(ClientState::Disconnected);
            self.transition(ClientState::Connecting);
        }

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = self.backoff.delay_for_attempt(attempt - 1);
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else if !self.backoff_wait(delay).await {
                    return;
                }
            }

            match self.open().await {
                Ok(()) => {
                    self.transition(ClientState::AwaitingHello);
                    return;
                }
                Err(GatewayError::Shutdown) => return,
                Err(error) => {
                    tracing::warn!(
                        shard = self.shard_id(),
                        attempt,
                        error = %error,
                        "Reconnect attempt failed"
                    );
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Sleep out a backoff delay while still answering the handle
    ///
    /// Returns false if shutdown fired first.
    async fn backoff_wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                _ = &mut sleep => return true,
                Some(command) = self.commands.recv() => self.answer_while_reconnecting(command),
            }
        }
    }

    fn answer_while_reconnecting(&self, command: Command) {
        match command {
            Command::Connect { reply } => {
                tracing::debug!(state = %self.state, "connect() ignored, reconnect in progress");
                let _ = reply.send(Ok(()));
            }
            Command::UpdatePresence { reply, .. } => {
                let _ = reply.send(Err(GatewayError::NotReady(self.state)));
            }
            Command::Inbound { generation, .. }
            | Command::TransportLost { generation, .. }
            | Command::Zombie { generation } => {
                tracing::trace!(generation, "Ignoring message from a previous connection");
            }
        }
    }

    async fn handle_transport_lost(&mut self, error: GatewayError) {
        match error.close_code() {
            Some(code) if !code.should_reconnect() => {
                tracing::error!(
                    shard = self.shard_id(),
                    code = %code,
                    "Gateway closed the connection permanently"
                );
                self.teardown().await;
                self.session.reset();
                self.transition(ClientState::Disconnected);
            }
            Some(code) if code.invalidates_session() => {
                tracing::warn!(shard = self.shard_id(), code = %code, "Session rejected, identifying again");
                self.reconnect(Reconnect::Fresh).await;
            }
            _ => {
                tracing::warn!(shard = self.shard_id(), error = %error, "Connection lost");
                self.reconnect(Reconnect::Resume).await;
            }
        }
    }

    // === Envelope handling ===

    async fn handle_envelope(&mut self, envelope: Envelope) {
        tracing::trace!(%envelope, "Received");
        match envelope.op {
            OpCode::Hello => self.handle_hello(&envelope).await,
            OpCode::Dispatch => self.handle_dispatch(envelope).await,
            OpCode::Heartbeat => self.heartbeat_now().await,
            OpCode::Reconnect => {
                tracing::info!(shard = self.shard_id(), "Server requested reconnect");
                self.reconnect(Reconnect::Resume).await;
            }
            OpCode::InvalidSession => {
                let resumable = envelope.resumable().unwrap_or(false);
                tracing::info!(shard = self.shard_id(), resumable, "Session invalidated");
                let mode = if resumable {
                    Reconnect::Resume
                } else {
                    Reconnect::Fresh
                };
                self.reconnect(mode).await;
            }
            op => self.protocol_violation(op).await,
        }
    }

    async fn handle_hello(&mut self, envelope: &Envelope) {
        if self.state != ClientState::AwaitingHello {
            return self.protocol_violation(OpCode::Hello).await;
        }
        let hello: HelloPayload = match envelope.payload() {
            Ok(hello) => hello,
            Err(error) => {
                tracing::warn!(error = %error, "Discarding malformed Hello");
                return;
            }
        };
        self.settle();

        let interval = Duration::from_millis(hello.heartbeat_interval.max(1));
        self.start_heartbeat(interval);

        if self.session.snapshot().is_resumable() {
            self.transition(ClientState::Resuming);
            self.resume().await;
        } else {
            self.transition(ClientState::Identifying);
            self.identify().await;
        }
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        let Some(lifetime) = self.lifetime.as_mut() else {
            return;
        };
        let supervisor = HeartbeatSupervisor {
            generation: lifetime.generation,
            interval,
            connection: self.connection.clone(),
            session: self.session.clone(),
            state: lifetime.heartbeat.clone(),
            commands: self.commands_tx.clone(),
            cancel: lifetime.cancel.clone(),
        };
        lifetime.supervisor = Some(supervisor.spawn());
    }

    async fn heartbeat_now(&mut self) {
        let Some(state) = self.lifetime.as_ref().map(|l| l.heartbeat.clone()) else {
            return;
        };
        self.settle();
        let sent = until_cancelled(
            &self.shutdown,
            heartbeat::beat(
                self.connection.as_ref(),
                &self.session,
                &state,
                BeatKind::Requested,
            ),
        )
        .await;
        if let Some(Err(error)) = sent {
            tracing::warn!(error = %error, "Failed to answer heartbeat request");
            self.reconnect(Reconnect::Resume).await;
        }
    }

    async fn handle_dispatch(&mut self, envelope: Envelope) {
        if !self.state.accepts_dispatch() {
            return self.protocol_violation(OpCode::Dispatch).await;
        }
        self.settle();

        if let Some(sequence) = envelope.s {
            if !self.session.observe(sequence) {
                tracing::debug!(sequence, "Dispatch did not advance the sequence");
            }
        }

        match envelope.event_name().and_then(|name| name.parse().ok()) {
            Some(GatewayEventType::Ready) => self.on_ready(&envelope),
            Some(GatewayEventType::Resumed) => {
                tracing::info!(
                    shard = self.shard_id(),
                    sequence = ?self.session.sequence(),
                    "Session resumed"
                );
                self.transition(ClientState::Ready);
            }
            _ => {}
        }

        self.forward(GatewayEvent::from(envelope)).await;
    }

    fn on_ready(&mut self, envelope: &Envelope) {
        let ready: ReadyPayload = envelope.payload().unwrap_or_else(|error| {
            tracing::warn!(error = %error, "READY payload not understood");
            ReadyPayload::default()
        });
        if ready.session_id.is_none() {
            tracing::warn!("READY without session_id; session will not be resumable");
        }

        self.session
            .establish(ready.session_id, ready.resume_gateway_url, envelope.s);
        tracing::info!(
            shard = self.shard_id(),
            version = ?ready.v,
            sequence = ?envelope.s,
            "Session ready"
        );
        self.transition(ClientState::Ready);
    }

    /// Hand a dispatch to the consumer, waiting while the queue is full
    async fn forward(&self, event: GatewayEvent) {
        if self.filter.is_ignored(&event.name) {
            tracing::trace!(event = %event.name, "Event ignored");
            return;
        }
        match until_cancelled(&self.shutdown, self.events.send(event)).await {
            Some(Ok(())) => {}
            Some(Err(_)) => tracing::debug!("Event receiver dropped, discarding event"),
            None => tracing::debug!("Shutdown while forwarding event"),
        }
    }

    /// Reset the violation streak after a well-formed envelope
    fn settle(&mut self) {
        if let Some(lifetime) = self.lifetime.as_mut() {
            lifetime.violations = 0;
        }
    }

    async fn protocol_violation(&mut self, op: OpCode) {
        let error = GatewayError::ProtocolViolation {
            op,
            state: self.state,
        };
        tracing::warn!(shard = self.shard_id(), error = %error, "Discarding envelope");

        let persistent = self.lifetime.as_mut().is_some_and(|lifetime| {
            lifetime.violations += 1;
            lifetime.violations >= MAX_PROTOCOL_VIOLATIONS
        });
        if persistent {
            tracing::warn!(shard = self.shard_id(), "Protocol violations persist, reconnecting");
            self.reconnect(Reconnect::Resume).await;
        }
    }

    // === Handshakes ===

    async fn identify(&mut self) {
        let token = match self.acquire_identify_token().await {
            Ok(token) => token,
            Err(GatewayError::Shutdown) => return,
            Err(error) => {
                tracing::warn!(shard = self.shard_id(), error = %error, "Identify admission failed");
                return self.reconnect(Reconnect::Resume).await;
            }
        };

        let payload = self.settings.identify();
        let sent = self.send(OpCode::Identify, &payload).await;
        if let Some(token) = token {
            token.release();
        }

        match sent {
            Ok(()) => tracing::info!(shard = self.shard_id(), "Identify sent"),
            Err(GatewayError::Shutdown) => {}
            Err(error) => {
                tracing::warn!(shard = self.shard_id(), error = %error, "Failed to send Identify");
                self.reconnect(Reconnect::Resume).await;
            }
        }
    }

    /// Wait for this client's turn to identify; `None` when no coordinator is configured
    async fn acquire_identify_token(&self) -> GatewayResult<Option<IdentifyToken>> {
        let Some(queue) = &self.identify_queue else {
            return Ok(None);
        };

        let (reply, granted) = oneshot::channel();
        let request = IdentifyRequest::new(self.shard_id(), reply);
        match until_cancelled(&self.shutdown, queue.send(request)).await {
            None => return Err(GatewayError::Shutdown),
            Some(Err(_)) => return Err(GatewayError::AdmissionClosed),
            Some(Ok(())) => {}
        }

        tracing::debug!(shard = self.shard_id(), "Waiting for identify admission");
        match until_cancelled(&self.shutdown, granted).await {
            None => Err(GatewayError::Shutdown),
            Some(Err(_)) => Err(GatewayError::AdmissionClosed),
            Some(Ok(token)) => {
                tracing::debug!(shard = self.shard_id(), key = token.key(), "Identify admitted");
                Ok(Some(token))
            }
        }
    }

    async fn resume(&mut self) {
        let session = self.session.snapshot();
        let Some(payload) = self.settings.resume(&session) else {
            self.transition(ClientState::Identifying);
            return self.identify().await;
        };

        match self.send(OpCode::Resume, &payload).await {
            Ok(()) => tracing::info!(
                shard = self.shard_id(),
                sequence = payload.seq,
                "Resume sent"
            ),
            Err(GatewayError::Shutdown) => {}
            Err(error) => {
                tracing::warn!(shard = self.shard_id(), error = %error, "Failed to send Resume");
                self.reconnect(Reconnect::Resume).await;
            }
        }
    }

    async fn send<T: Serialize + ?Sized>(&self, op: OpCode, payload: &T) -> GatewayResult<()> {
        let frame = match codec::encode(op, payload) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!(error = %error, "Dropping frame that could not be encoded");
                return Err(error);
            }
        };
        match until_cancelled(&self.shutdown, self.connection.send(frame)).await {
            None => Err(GatewayError::Shutdown),
            Some(result) => result.map_err(GatewayError::Send),
        }
    }
}
