//! Network service facade.
//!
//! The single entry point consumed by higher-level features. Owns the
//! declared mode, merges the orchestrator's and registry's event
//! streams into one [`NetworkState`] signal and one inbound message
//! stream, and exposes `run`/`stop`/`disconnect`/`send`. All state
//! lives inside one actor task; the [`NetworkService`] handle is a
//! thin command sender plus `watch` subscriptions.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TetherError;
use crate::message::Message;
use crate::net::bandwidth::PerformanceReport;
use crate::net::connection::{ConnectionId, PeerDescriptor};
use crate::net::registry::{ConnectionRegistry, RegistryHandle};
use crate::role::version::{check_compatibility, VersionInfo};
use crate::role::{RoleDecision, RoleNegotiator, SessionRole};
use crate::session::events::SessionEvent;
use crate::session::orchestrator::{PeerHandle, SessionOrchestrator};
use crate::session::state::{transition, NetworkState, StateEffect, StateEvent};

/// How long the version gate waits for the peer's exchange before
/// proceeding with a warning.
pub const VERSION_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cadence of registry performance monitoring.
const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

// ── Commands ─────────────────────────────────────────────────────

#[derive(Debug)]
enum ServiceCommand {
    SetMode(SessionRole),
    Run(PeerHandle),
    Stop {
        by_user: bool,
        reason: Option<String>,
    },
    Disconnect,
    Send(Message),
    RequestRoleSwap,
    VersionGateExpired(ConnectionId),
}

// ── NetworkService handle ────────────────────────────────────────

/// Clonable facade handle.
///
/// The inbound-message and performance-report streams are single
/// consumer: `take_inbound`/`take_reports` yield `Some` once.
pub struct NetworkService {
    cmd_tx: mpsc::Sender<ServiceCommand>,
    state_rx: watch::Receiver<NetworkState>,
    connections_rx: watch::Receiver<HashMap<ConnectionId, PeerDescriptor>>,
    last_error_rx: watch::Receiver<Option<String>>,
    role_rx: watch::Receiver<SessionRole>,
    inbound: Option<mpsc::Receiver<Message>>,
    reports: Option<mpsc::Receiver<(ConnectionId, PerformanceReport)>>,
}

impl NetworkService {
    /// Spawn the service actor (and its registry) onto the runtime.
    pub fn spawn(initial_role: SessionRole) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (registry_inbound_tx, registry_inbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (reports_tx, reports_rx) = mpsc::channel(64);

        let (state_tx, state_rx) = watch::channel(NetworkState::stopped_for(initial_role));
        let (connections_tx, connections_rx) = watch::channel(HashMap::new());
        let (last_error_tx, last_error_rx) = watch::channel(None);
        let (role_tx, role_rx) = watch::channel(initial_role);

        let (registry_actor, registry) =
            ConnectionRegistry::new(events_tx.clone(), registry_inbound_tx);
        registry_actor.spawn();

        let actor = ServiceActor {
            mode: initial_role,
            state: NetworkState::stopped_for(initial_role),
            negotiator: RoleNegotiator::new(initial_role),
            events_tx,
            registry,
            cmd_tx: cmd_tx.clone(),
            events_rx,
            registry_inbound_rx,
            inbound_tx,
            reports_tx,
            state_tx,
            connections_tx,
            last_error_tx,
            role_tx,
            connections: HashMap::new(),
            run_token: None,
            run_task: None,
            last_peer: None,
            reconnect_attempted: false,
            pending_gates: HashMap::new(),
            expected_stops: HashSet::new(),
        };
        actor.spawn(cmd_rx);

        Self {
            cmd_tx,
            state_rx,
            connections_rx,
            last_error_rx,
            role_rx,
            inbound: Some(inbound_rx),
            reports: Some(reports_rx),
        }
    }

    // ── Operations ───────────────────────────────────────────────

    pub async fn set_mode(&self, mode: SessionRole) -> Result<(), TetherError> {
        self.command(ServiceCommand::SetMode(mode)).await
    }

    /// Start advertising (host) or browsing (viewer) for `peer`.
    pub async fn run(&self, peer: PeerHandle) -> Result<(), TetherError> {
        self.command(ServiceCommand::Run(peer)).await
    }

    pub async fn stop(&self, by_user: bool, reason: Option<String>) -> Result<(), TetherError> {
        self.command(ServiceCommand::Stop { by_user, reason }).await
    }

    /// Politely tell the peer we are leaving, then stop.
    pub async fn disconnect(&self) -> Result<(), TetherError> {
        self.command(ServiceCommand::Disconnect).await
    }

    /// Best-effort broadcast to every ready connection.
    pub async fn send(&self, message: Message) -> Result<(), TetherError> {
        self.command(ServiceCommand::Send(message)).await
    }

    /// Initiate a role swap; the outcome is observable on [`role`](Self::role).
    pub async fn request_role_swap(&self) -> Result<(), TetherError> {
        self.command(ServiceCommand::RequestRoleSwap).await
    }

    // ── Subscriptions ────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<NetworkState> {
        self.state_rx.clone()
    }

    pub fn connections(&self) -> watch::Receiver<HashMap<ConnectionId, PeerDescriptor>> {
        self.connections_rx.clone()
    }

    pub fn last_error(&self) -> watch::Receiver<Option<String>> {
        self.last_error_rx.clone()
    }

    pub fn role(&self) -> watch::Receiver<SessionRole> {
        self.role_rx.clone()
    }

    /// The inbound domain-message stream. `None` after the first call.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.inbound.take()
    }

    /// The per-connection performance-report stream.
    pub fn take_reports(&mut self) -> Option<mpsc::Receiver<(ConnectionId, PerformanceReport)>> {
        self.reports.take()
    }

    async fn command(&self, cmd: ServiceCommand) -> Result<(), TetherError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| TetherError::ChannelClosed)
    }
}

// ── ServiceActor ─────────────────────────────────────────────────

struct ServiceActor {
    mode: SessionRole,
    state: NetworkState,
    negotiator: RoleNegotiator,
    /// Channel the orchestrator and registry both report through.
    events_tx: crate::session::events::SessionEventSender,
    registry: RegistryHandle,
    cmd_tx: mpsc::Sender<ServiceCommand>,
    events_rx: mpsc::Receiver<SessionEvent>,
    registry_inbound_rx: mpsc::Receiver<(ConnectionId, Message)>,
    inbound_tx: mpsc::Sender<Message>,
    reports_tx: mpsc::Sender<(ConnectionId, PerformanceReport)>,
    state_tx: watch::Sender<NetworkState>,
    connections_tx: watch::Sender<HashMap<ConnectionId, PeerDescriptor>>,
    last_error_tx: watch::Sender<Option<String>>,
    role_tx: watch::Sender<SessionRole>,
    connections: HashMap<ConnectionId, PeerDescriptor>,
    run_token: Option<CancellationToken>,
    run_task: Option<JoinHandle<()>>,
    last_peer: Option<PeerHandle>,
    reconnect_attempted: bool,
    /// Connections whose version exchange is still outstanding, with
    /// the traffic held back until the gate resolves.
    pending_gates: HashMap<ConnectionId, Vec<Message>>,
    /// Connections whose peer announced a graceful teardown; their
    /// stop must not trigger a reconnect.
    expected_stops: HashSet<ConnectionId>,
}

impl ServiceActor {
    fn spawn(mut self, mut cmd_rx: mpsc::Receiver<ServiceCommand>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut monitor = tokio::time::interval(MONITOR_INTERVAL);
            monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    },
                    Some(event) = self.events_rx.recv() => {
                        self.handle_event(event).await;
                    }
                    Some((id, message)) = self.registry_inbound_rx.recv() => {
                        self.handle_inbound(id, message).await;
                    }
                    _ = monitor.tick() => {
                        if !self.connections.is_empty() {
                            let _ = self.registry.monitor().await;
                        }
                    }
                }
            }
        })
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: ServiceCommand) {
        match cmd {
            ServiceCommand::SetMode(mode) => self.set_mode(mode),
            ServiceCommand::Run(peer) => self.run(peer),
            ServiceCommand::Stop { by_user, reason } => self.stop(by_user, reason).await,
            ServiceCommand::Disconnect => {
                let _ = self.registry.send_to_all(Message::WillDisconnect).await;
                self.stop(true, None).await;
            }
            ServiceCommand::Send(message) => {
                let _ = self.registry.send_to_all(message).await;
            }
            ServiceCommand::RequestRoleSwap => {
                let payload = self.negotiator.request_role_swap();
                let _ = self
                    .registry
                    .send_to_all(Message::RoleChangeRequest(payload))
                    .await;
                let _ = self.role_tx.send(self.negotiator.role());
            }
            ServiceCommand::VersionGateExpired(id) => {
                if let Some(held) = self.pending_gates.remove(&id) {
                    warn!(connection = %id, "no version exchange from peer, proceeding");
                    for message in held {
                        self.route_inbound(id, message).await;
                    }
                }
            }
        }
    }

    fn set_mode(&mut self, mode: SessionRole) {
        self.mode = mode;
        self.cancel_run();
        self.publish_state(NetworkState::stopped_for(mode));
    }

    fn run(&mut self, peer: PeerHandle) {
        self.cancel_run();
        self.last_peer = Some(peer.clone());
        self.reconnect_attempted = false;
        self.spawn_run(peer);
    }

    fn spawn_run(&mut self, peer: PeerHandle) {
        let token = CancellationToken::new();
        let orchestrator =
            SessionOrchestrator::new(self.registry.clone(), self.events_tx.clone());
        let mode = self.mode;
        let guard = token.clone();
        self.run_token = Some(token);
        self.run_task = Some(tokio::spawn(async move {
            orchestrator.run(mode, peer, guard).await;
        }));
    }

    async fn stop(&mut self, by_user: bool, reason: Option<String>) {
        info!(by_user, reason = reason.as_deref().unwrap_or("-"), "stopping session");
        self.cancel_run();
        if reason.is_some() {
            let _ = self.last_error_tx.send(reason.clone());
        }
        // Entering Stopped first makes the trailing ConnectionStopped
        // events inert (no reconnect, no second cancel).
        self.publish_state(NetworkState::stopped_for(self.mode));
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            let _ = self.registry.stop(id, reason.clone()).await;
        }
    }

    fn cancel_run(&mut self) {
        if let Some(token) = self.run_token.take() {
            token.cancel();
        }
        self.run_task.take();
    }

    // ── Session events ───────────────────────────────────────────

    async fn handle_event(&mut self, event: SessionEvent) {
        let state_event = match event {
            SessionEvent::ListenerRunning { local_addr } => {
                debug!(%local_addr, "listener running");
                Some(StateEvent::ListenerRunning)
            }
            SessionEvent::ListenerStopped { reason } => {
                self.note_error(reason);
                Some(StateEvent::ListenerStopped)
            }
            SessionEvent::BrowserRunning => Some(StateEvent::BrowserRunning),
            SessionEvent::BrowserStopped { reason } => {
                self.note_error(reason);
                Some(StateEvent::BrowserStopped)
            }
            SessionEvent::Connecting => Some(StateEvent::Connecting),
            SessionEvent::ConnectionReady { id, peer } => {
                self.connections.insert(id, peer);
                let _ = self.connections_tx.send(self.connections.clone());
                self.reconnect_attempted = false;
                self.open_version_gate(id).await;
                Some(StateEvent::ConnectionReady)
            }
            SessionEvent::ConnectionStopped { id, reason, .. } => {
                self.connections.remove(&id);
                let _ = self.connections_tx.send(self.connections.clone());
                self.pending_gates.remove(&id);
                self.note_error(reason);
                if self.expected_stops.remove(&id) && self.mode == SessionRole::Viewer {
                    // Peer said goodbye: fold as a clean stop, never
                    // as a lost link. A host just keeps publishing.
                    self.cancel_run();
                    self.publish_state(NetworkState::stopped_for(self.mode));
                    None
                } else {
                    Some(StateEvent::ConnectionStopped)
                }
            }
            SessionEvent::Performance { id, report, .. } => {
                let _ = self.reports_tx.try_send((id, report));
                None
            }
        };

        if let Some(state_event) = state_event {
            let (next, effects) = transition(self.state, self.mode, state_event);
            self.publish_state(next);
            for effect in effects {
                self.apply_effect(effect).await;
            }
        }
    }

    async fn apply_effect(&mut self, effect: StateEffect) {
        match effect {
            StateEffect::SendWakeUp => {
                let _ = self.registry.send_to_all(Message::StartSession).await;
            }
            StateEffect::CancelOrchestration => self.cancel_run(),
            StateEffect::AttemptReconnect => self.attempt_reconnect().await,
        }
    }

    /// One reconnect attempt per lost link, against the last-known
    /// peer. Without one, the user must restart pairing.
    async fn attempt_reconnect(&mut self) {
        if self.reconnect_attempted {
            debug!("reconnect already attempted, giving up");
            self.cancel_run();
            self.publish_state(NetworkState::stopped_for(self.mode));
            return;
        }
        match self.last_peer.clone() {
            Some(peer) => {
                info!(peer = %peer.name, "link lost, attempting reconnect");
                self.reconnect_attempted = true;
                self.cancel_run();
                self.spawn_run(peer);
            }
            None => {
                self.note_error(Some(
                    "peer lost and no previous peer is known; restart pairing".into(),
                ));
                self.cancel_run();
                self.publish_state(NetworkState::stopped_for(self.mode));
            }
        }
    }

    // ── Inbound messages ─────────────────────────────────────────

    async fn handle_inbound(&mut self, id: ConnectionId, message: Message) {
        if let Message::VersionExchange(remote) = message {
            self.close_version_gate(id, remote).await;
            return;
        }
        // While the gate is open only transport liveness and teardown
        // traffic flows; everything else waits for the exchange (or
        // its timeout) to resolve.
        if let Some(held) = self.pending_gates.get_mut(&id) {
            match message {
                Message::Ping { .. }
                | Message::HealthCheckRequest { .. }
                | Message::HealthCheckResponse { .. }
                | Message::WillDisconnect => {}
                deferred => {
                    held.push(deferred);
                    return;
                }
            }
        }
        self.route_inbound(id, message).await;
    }

    async fn close_version_gate(&mut self, id: ConnectionId, remote: VersionInfo) {
        let held = self.pending_gates.remove(&id).unwrap_or_default();
        if let Err(e) = check_compatibility(VersionInfo::current(), remote) {
            warn!(connection = %id, error = %e, "version gate failed");
            self.stop(true, Some(e.to_string())).await;
            return;
        }
        for message in held {
            self.route_inbound(id, message).await;
        }
    }

    /// Dispatch one post-gate message. Never sees a `VersionExchange`.
    async fn route_inbound(&mut self, id: ConnectionId, message: Message) {
        match message {
            Message::Ping { .. } | Message::VersionExchange(_) => {}
            Message::HealthCheckRequest { timestamp_ms } => {
                let _ = self
                    .registry
                    .send(
                        Message::HealthCheckResponse {
                            echo_timestamp_ms: timestamp_ms,
                        },
                        id,
                    )
                    .await;
            }
            // Answered inside the registry; never reaches here.
            Message::HealthCheckResponse { .. } => {}
            Message::RoleChangeRequest(payload) => {
                match self.negotiator.on_role_change(&payload) {
                    RoleDecision::Applied(role) => {
                        info!(%role, "role change applied");
                        let _ = self.role_tx.send(role);
                    }
                    RoleDecision::Stale => {
                        debug!("stale role change request discarded");
                    }
                }
            }
            Message::WillDisconnect => {
                debug!(connection = %id, "peer announced disconnect");
                self.expected_stops.insert(id);
                let _ = self.inbound_tx.try_send(Message::WillDisconnect);
                let _ = self.registry.stop(id, None).await;
            }
            other => {
                // Domain traffic for the capture / render layers.
                if self.inbound_tx.send(other).await.is_err() {
                    debug!("inbound consumer gone");
                }
            }
        }
    }

    async fn open_version_gate(&mut self, id: ConnectionId) {
        let _ = self
            .registry
            .send(Message::VersionExchange(VersionInfo::current()), id)
            .await;
        self.pending_gates.insert(id, Vec::new());
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(VERSION_EXCHANGE_TIMEOUT).await;
            let _ = cmd_tx.send(ServiceCommand::VersionGateExpired(id)).await;
        });
    }

    // ── Bookkeeping ──────────────────────────────────────────────

    fn publish_state(&mut self, next: NetworkState) {
        if next != self.state {
            debug!(from = %self.state, to = %next, "state change");
            self.state = next;
            let _ = self.state_tx.send(next);
        }
    }

    fn note_error(&self, reason: Option<String>) {
        if let Some(reason) = reason {
            let _ = self.last_error_tx.send(Some(reason));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::state::{HostPhase, ViewerPhase};

    async fn wait_for_state(
        rx: &mut watch::Receiver<NetworkState>,
        want: NetworkState,
    ) {
        let deadline = Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                if *rx.borrow() == want {
                    return;
                }
                rx.changed().await.expect("state channel closed");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {want}"));
    }

    #[tokio::test]
    async fn mode_set_resets_to_stopped() {
        let service = NetworkService::spawn(SessionRole::Host);
        let mut state = service.state();
        assert_eq!(*state.borrow(), NetworkState::Host(HostPhase::Stopped));

        service.set_mode(SessionRole::Viewer).await.unwrap();
        wait_for_state(&mut state, NetworkState::Viewer(ViewerPhase::Stopped)).await;
    }

    #[tokio::test]
    async fn host_run_reaches_publishing() {
        let service = NetworkService::spawn(SessionRole::Host);
        let mut state = service.state();

        service
            .run(PeerHandle::new("viewer", "127.0.0.1:0"))
            .await
            .unwrap();
        wait_for_state(&mut state, NetworkState::Host(HostPhase::Publishing)).await;

        service.stop(true, None).await.unwrap();
        wait_for_state(&mut state, NetworkState::Host(HostPhase::Stopped)).await;
    }

    #[tokio::test]
    async fn viewer_dial_failure_ends_stopped_with_error() {
        // An address nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let service = NetworkService::spawn(SessionRole::Viewer);
        let mut state = service.state();

        service
            .run(PeerHandle::new("host", addr.to_string()))
            .await
            .unwrap();
        wait_for_state(&mut state, NetworkState::Viewer(ViewerPhase::Stopped)).await;

        let error = service.last_error().borrow().clone();
        assert!(error.is_some(), "dial failure must surface in last_error");
    }

    /// Reserve an ephemeral port for the host to bind.
    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn domain_traffic_waits_for_the_version_exchange() {
        use crate::message::RenderState;
        use crate::net::connection::Connection;

        let port = free_port();
        let endpoint = format!("127.0.0.1:{port}");
        let mut host = NetworkService::spawn(SessionRole::Host);
        let mut host_state = host.state();
        let mut inbound = host.take_inbound().unwrap();

        host.run(PeerHandle::new("viewer", endpoint.clone()))
            .await
            .unwrap();
        wait_for_state(&mut host_state, NetworkState::Host(HostPhase::Publishing)).await;

        let addr: std::net::SocketAddr = endpoint.parse().unwrap();
        let peer = Connection::dial(addr, "host").await.unwrap();

        // The gate opens in the same step that tracks the connection.
        let mut connections = host.connections();
        tokio::time::timeout(Duration::from_secs(5), async {
            while connections.borrow().is_empty() {
                connections.changed().await.unwrap();
            }
        })
        .await
        .expect("host never tracked the link");

        // A report sent before the peer declares its version must not
        // reach the consumer yet.
        peer.send(&Message::RenderStateReport(RenderState::Unstable))
            .await
            .unwrap();
        let early = tokio::time::timeout(Duration::from_millis(300), inbound.recv()).await;
        assert!(early.is_err(), "report must be held until the gate resolves");

        // A compatible exchange resolves the gate and releases it.
        peer.send(&Message::VersionExchange(VersionInfo::current()))
            .await
            .unwrap();
        let released = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
            .await
            .expect("held report never released")
            .expect("inbound closed");
        assert_eq!(released, Message::RenderStateReport(RenderState::Unstable));
    }

    #[tokio::test]
    async fn host_and_viewer_connect_end_to_end() {
        let endpoint = format!("127.0.0.1:{}", free_port());
        let host = NetworkService::spawn(SessionRole::Host);
        let viewer = NetworkService::spawn(SessionRole::Viewer);
        let mut host_state = host.state();
        let mut viewer_state = viewer.state();

        host.run(PeerHandle::new("viewer", endpoint.clone()))
            .await
            .unwrap();
        wait_for_state(&mut host_state, NetworkState::Host(HostPhase::Publishing)).await;

        viewer.run(PeerHandle::new("host", endpoint)).await.unwrap();
        wait_for_state(&mut viewer_state, NetworkState::Viewer(ViewerPhase::Connected)).await;

        // Host keeps publishing with the link in its active set.
        let mut host_connections = host.connections();
        tokio::time::timeout(Duration::from_secs(5), async {
            while host_connections.borrow().is_empty() {
                host_connections.changed().await.unwrap();
            }
        })
        .await
        .expect("host never tracked the viewer link");
        assert_eq!(*host_state.borrow(), NetworkState::Host(HostPhase::Publishing));

        // A polite goodbye lands the viewer in stopped, not lost.
        viewer.disconnect().await.unwrap();
        wait_for_state(&mut viewer_state, NetworkState::Viewer(ViewerPhase::Stopped)).await;
    }
}
