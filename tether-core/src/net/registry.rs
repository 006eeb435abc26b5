//! Transport connection registry.
//!
//! Owns the set of active point-to-point connections. All mutation
//! happens inside one actor task fed by a command channel; callers
//! interact through the clonable [`RegistryHandle`]. For every tracked
//! connection the registry spawns two consumers — one draining the
//! inbound message stream, one draining the lifecycle stream — and
//! fans the results out as the shared remote-message channel and
//! [`SessionEvent`]s.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TetherError;
use crate::flags::ProtocolFlags;
use crate::message::{epoch_ms, Message};
use crate::net::bandwidth::BandwidthEstimator;
use crate::net::connection::{Connection, ConnectionId, ConnectionSender, PeerDescriptor};
use crate::net::lifecycle::{lifecycle_effects, ConnectionLifecycleState, LifecycleEffect};
use crate::packet::Packet;
use crate::session::events::{SessionEvent, SessionEventSender};

// ── Commands ─────────────────────────────────────────────────────

/// Commands accepted by the registry actor.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Begin tracking a connection.
    Add(Connection),
    /// Send to one tracked connection (best-effort).
    Send {
        message: Message,
        target: ConnectionId,
    },
    /// Send to all tracked connections (best-effort).
    SendToAll(Message),
    /// Cancel a connection's consumers and remove it.
    Stop {
        id: ConnectionId,
        reason: Option<String>,
    },
    /// Forget a connection's bookkeeping without the stop path.
    Invalidate(ConnectionId),
    /// Emit a fresh performance report per ready connection.
    Monitor,
    /// Lifecycle update from a connection's consumer.
    Lifecycle {
        id: ConnectionId,
        state: ConnectionLifecycleState,
    },
    /// RTT measured from a health-check round trip.
    RecordRtt {
        id: ConnectionId,
        rtt_ms: u64,
    },
}

// ── RegistryHandle ───────────────────────────────────────────────

/// Clonable handle to the registry actor.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub async fn add(&self, connection: Connection) -> Result<(), TetherError> {
        self.command(RegistryCommand::Add(connection)).await
    }

    pub async fn send(&self, message: Message, target: ConnectionId) -> Result<(), TetherError> {
        self.command(RegistryCommand::Send { message, target }).await
    }

    pub async fn send_to_all(&self, message: Message) -> Result<(), TetherError> {
        self.command(RegistryCommand::SendToAll(message)).await
    }

    pub async fn stop(&self, id: ConnectionId, reason: Option<String>) -> Result<(), TetherError> {
        self.command(RegistryCommand::Stop { id, reason }).await
    }

    pub async fn invalidate(&self, id: ConnectionId) -> Result<(), TetherError> {
        self.command(RegistryCommand::Invalidate(id)).await
    }

    pub async fn monitor(&self) -> Result<(), TetherError> {
        self.command(RegistryCommand::Monitor).await
    }

    async fn command(&self, cmd: RegistryCommand) -> Result<(), TetherError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| TetherError::ChannelClosed)
    }
}

// ── TrackedConnection ────────────────────────────────────────────

struct TrackedConnection {
    /// Keeps the link's transport tasks alive; dropped on teardown.
    connection: Connection,
    peer: PeerDescriptor,
    sender: ConnectionSender,
    ready: bool,
    bandwidth: BandwidthEstimator,
    consumers: Vec<JoinHandle<()>>,
}

// ── ConnectionRegistry ───────────────────────────────────────────

/// The registry actor. Construct with [`ConnectionRegistry::new`],
/// then [`spawn`](Self::spawn) it onto the runtime.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, TrackedConnection>,
    cmd_tx: mpsc::Sender<RegistryCommand>,
    cmd_rx: mpsc::Receiver<RegistryCommand>,
    events_tx: SessionEventSender,
    inbound_tx: mpsc::Sender<(ConnectionId, Message)>,
}

impl ConnectionRegistry {
    /// Create the actor plus its public handle.
    pub fn new(
        events_tx: SessionEventSender,
        inbound_tx: mpsc::Sender<(ConnectionId, Message)>,
    ) -> (Self, RegistryHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let handle = RegistryHandle {
            cmd_tx: cmd_tx.clone(),
        };
        (
            Self {
                connections: HashMap::new(),
                cmd_tx,
                cmd_rx,
                events_tx,
                inbound_tx,
            },
            handle,
        )
    }

    /// Run the actor until every handle is dropped.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(cmd) = self.cmd_rx.recv().await {
                self.handle_command(cmd).await;
            }
        })
    }

    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Add(connection) => self.add(connection),
            RegistryCommand::Send { message, target } => self.send(&message, target).await,
            RegistryCommand::SendToAll(message) => {
                let targets: Vec<ConnectionId> = self.connections.keys().copied().collect();
                for target in targets {
                    self.send(&message, target).await;
                }
            }
            RegistryCommand::Stop { id, reason } => {
                if let Some((peer, was_ready)) = self.teardown(id) {
                    if was_ready {
                        self.emit(SessionEvent::ConnectionStopped { id, peer, reason })
                            .await;
                    }
                }
            }
            RegistryCommand::Invalidate(id) => {
                // Release residual bookkeeping without the stopped
                // notification path.
                if self.teardown(id).is_some() {
                    debug!(connection = %id, "invalidated");
                }
            }
            RegistryCommand::Monitor => self.monitor().await,
            RegistryCommand::Lifecycle { id, state } => self.handle_lifecycle(id, state).await,
            RegistryCommand::RecordRtt { id, rtt_ms } => {
                if let Some(tracked) = self.connections.get_mut(&id) {
                    tracked
                        .bandwidth
                        .record_rtt(std::time::Duration::from_millis(rtt_ms));
                }
            }
        }
    }

    // ── Operations ───────────────────────────────────────────────

    fn add(&mut self, mut connection: Connection) {
        let id = connection.id();
        let peer = connection.peer().clone();
        let sender = connection.sender();

        let Some(mut incoming) = connection.take_incoming() else {
            warn!(connection = %id, "connection added twice, ignoring");
            return;
        };
        let Some(mut lifecycle) = connection.take_lifecycle() else {
            warn!(connection = %id, "connection lifecycle already consumed, ignoring");
            return;
        };

        // Consumer 1: inbound messages → shared remote channel.
        let inbound_tx = self.inbound_tx.clone();
        let rtt_cmd_tx = self.cmd_tx.clone();
        let inbound_task = tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                match message {
                    // Health-check answers are transport-internal:
                    // fold the RTT into the estimator, don't forward.
                    Message::HealthCheckResponse { echo_timestamp_ms } => {
                        let rtt_ms = epoch_ms().saturating_sub(echo_timestamp_ms);
                        let _ = rtt_cmd_tx.send(RegistryCommand::RecordRtt { id, rtt_ms }).await;
                    }
                    other => {
                        if inbound_tx.send((id, other)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // Consumer 2: lifecycle updates → registry actor.
        let lifecycle_cmd_tx = self.cmd_tx.clone();
        let lifecycle_task = tokio::spawn(async move {
            while let Some(state) = lifecycle.recv().await {
                if lifecycle_cmd_tx
                    .send(RegistryCommand::Lifecycle { id, state })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        info!(connection = %id, peer = %peer, "tracking connection");
        self.connections.insert(
            id,
            TrackedConnection {
                connection,
                peer,
                sender,
                ready: false,
                bandwidth: BandwidthEstimator::new(),
                consumers: vec![inbound_task, lifecycle_task],
            },
        );
    }

    /// Send one message. Errors are logged, never propagated.
    ///
    /// Stream frames are droppable: when the outbound queue is full
    /// the frame is discarded so the link never queues stale video.
    /// Everything else (role changes, version exchange, goodbyes)
    /// must not be lost, so those wait for queue capacity instead.
    async fn send(&mut self, message: &Message, target: ConnectionId) {
        let Some(tracked) = self.connections.get_mut(&target) else {
            debug!(connection = %target, "send to unknown connection dropped");
            return;
        };

        let packet = match Packet::from_message(message) {
            Ok(p) => p,
            Err(e) => {
                warn!(connection = %target, error = %e, "failed to encode message");
                return;
            }
        };

        let bytes = packet.payload().len() as u64 + crate::header::HEADER_SIZE as u64;
        if message.flags().contains(ProtocolFlags::STREAMING) {
            match tracked.sender.try_send(packet) {
                Ok(()) => tracked.bandwidth.record(bytes),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection = %target, "outbound queue full, dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(connection = %target, "outbound channel closed");
                }
            }
        } else {
            match tracked.sender.send(packet).await {
                Ok(()) => tracked.bandwidth.record(bytes),
                Err(_) => debug!(connection = %target, "outbound channel closed"),
            }
        }
    }

    async fn monitor(&mut self) {
        let probes: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, t)| t.ready)
            .map(|(&id, _)| id)
            .collect();

        for id in probes {
            let (peer, report) = {
                let tracked = &self.connections[&id];
                (tracked.peer.clone(), tracked.bandwidth.report())
            };
            self.emit(SessionEvent::Performance { id, peer, report }).await;
            self.send(&Message::health_check_now(), id).await;
        }
    }

    async fn handle_lifecycle(&mut self, id: ConnectionId, state: ConnectionLifecycleState) {
        debug!(connection = %id, %state, "lifecycle update");
        let mut removed: Option<(PeerDescriptor, bool)> = None;

        for effect in lifecycle_effects(&state) {
            match effect {
                LifecycleEffect::NotifyReady => {
                    if let Some(tracked) = self.connections.get_mut(&id) {
                        tracked.ready = true;
                        let peer = tracked.peer.clone();
                        self.emit(SessionEvent::ConnectionReady { id, peer }).await;
                    }
                }
                LifecycleEffect::StopConnection => {
                    removed = self.teardown(id);
                }
                LifecycleEffect::NotifyStopped { reason } => {
                    if let Some((peer, was_ready)) = removed.take() {
                        if was_ready {
                            self.emit(SessionEvent::ConnectionStopped { id, peer, reason })
                                .await;
                        }
                    }
                }
            }
        }
    }

    /// Cancel consumers, close the link, and forget the entry.
    ///
    /// Returns the peer descriptor and whether the connection had
    /// become ready. Idempotent: a second teardown is a no-op.
    fn teardown(&mut self, id: ConnectionId) -> Option<(PeerDescriptor, bool)> {
        let tracked = self.connections.remove(&id)?;
        for task in &tracked.consumers {
            task.abort();
        }
        tracked.connection.close();
        Some((tracked.peer, tracked.ready))
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events_tx.send(event).await.is_err() {
            debug!("session event receiver gone");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
