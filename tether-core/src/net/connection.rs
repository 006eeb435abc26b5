//! A managed point-to-point link.
//!
//! Wraps a framed TCP stream in background reader / writer / heartbeat
//! tasks and exposes three things to the registry: an outbound packet
//! sender, an inbound [`Message`] stream, and a lifecycle-state stream.
//! Lifecycle transitions are pushed by the transport tasks only; the
//! registry never mutates them.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::TetherCodec;
use crate::error::TetherError;
use crate::message::Message;
use crate::net::lifecycle::ConnectionLifecycleState;
use crate::packet::Packet;

/// Heartbeat interval for the keep-alive ping task.
const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

// ── Identifiers ──────────────────────────────────────────────────

/// Opaque identifier of one tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor of the remote peer on an established link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerDescriptor {
    /// Human-readable peer name (the dialed handle's name, or the
    /// remote address for accepted links).
    pub name: String,
    /// Remote socket address.
    pub addr: SocketAddr,
}

impl std::fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}

/// Outbound half of a connection, clonable into the registry.
pub type ConnectionSender = mpsc::Sender<Packet>;

// ── Connection ───────────────────────────────────────────────────

/// One established transport link.
pub struct Connection {
    id: ConnectionId,
    peer: PeerDescriptor,
    tx: ConnectionSender,
    incoming: Option<mpsc::Receiver<Message>>,
    lifecycle: Option<mpsc::Receiver<ConnectionLifecycleState>>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Wrap an established TCP stream into a managed connection.
    ///
    /// Spawns the writer, reader, heartbeat, and lifecycle-supervisor
    /// tasks, then reports `Setup → Preparing → Ready` on the
    /// lifecycle stream.
    pub fn establish(stream: TcpStream, peer_name: &str) -> Result<Self, TetherError> {
        let addr = stream.peer_addr()?;
        let peer = PeerDescriptor {
            name: peer_name.to_string(),
            addr,
        };
        let id = ConnectionId::new();

        let (mut net_writer, mut net_reader) = Framed::new(stream, TetherCodec).split();

        // User → network.
        let (user_tx, mut network_rx) = mpsc::channel::<Packet>(256);
        // Network → user.
        let (network_tx, user_rx) = mpsc::channel::<Message>(256);
        // Lifecycle updates toward the registry.
        let (lifecycle_tx, lifecycle_rx) = mpsc::channel::<ConnectionLifecycleState>(16);
        // Transport failures toward the supervisor.
        let (fail_tx, mut fail_rx) = mpsc::channel::<String>(4);

        let shutdown = CancellationToken::new();

        // Writer task: user → network.
        {
            let shutdown = shutdown.clone();
            let fail_tx = fail_tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            // Flush anything already queued (a goodbye,
                            // typically) before the socket drops.
                            while let Ok(packet) = network_rx.try_recv() {
                                if net_writer.send(packet).await.is_err() {
                                    break;
                                }
                            }
                            break;
                        }
                        packet = network_rx.recv() => {
                            let Some(packet) = packet else { break };
                            if let Err(e) = net_writer.send(packet).await {
                                let _ = fail_tx.send(format!("write error: {e}")).await;
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Reader task: network → user.
        {
            let shutdown = shutdown.clone();
            let network_tx = network_tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        result = net_reader.next() => {
                            match result {
                                Some(Ok(packet)) => match packet.into_message() {
                                    Ok(message) => {
                                        if network_tx.send(message).await.is_err() {
                                            break; // receiver dropped
                                        }
                                    }
                                    Err(e) => {
                                        // Corrupt payload: drop the frame, keep reading.
                                        warn!(connection = %id, error = %e, "dropping undecodable packet");
                                    }
                                },
                                Some(Err(e)) => {
                                    let _ = fail_tx.send(format!("read error: {e}")).await;
                                    break;
                                }
                                None => {
                                    let _ = fail_tx.send("connection closed by peer".to_string()).await;
                                    break;
                                }
                            }
                        }
                    }
                }
            });
        }

        // Heartbeat task.
        {
            let shutdown = shutdown.clone();
            let heartbeat_tx = user_tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => {
                            let Ok(packet) = Packet::from_message(&Message::ping_now()) else {
                                continue;
                            };
                            if heartbeat_tx.send(packet).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Lifecycle supervisor: exactly one terminal state is emitted.
        {
            let shutdown = shutdown.clone();
            let lifecycle_tx = lifecycle_tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = lifecycle_tx.send(ConnectionLifecycleState::Cancelled).await;
                    }
                    reason = fail_rx.recv() => {
                        let reason = reason.unwrap_or_else(|| "transport task gone".to_string());
                        debug!(connection = %id, %reason, "link failed");
                        let _ = lifecycle_tx
                            .send(ConnectionLifecycleState::Failed(reason))
                            .await;
                    }
                }
            });
        }

        // TCP is established, tasks are installed: report readiness.
        for state in [
            ConnectionLifecycleState::Setup,
            ConnectionLifecycleState::Preparing,
            ConnectionLifecycleState::Ready,
        ] {
            lifecycle_tx
                .try_send(state)
                .map_err(|_| TetherError::ChannelClosed)?;
        }

        Ok(Self {
            id,
            peer,
            tx: user_tx,
            incoming: Some(user_rx),
            lifecycle: Some(lifecycle_rx),
            shutdown,
        })
    }

    /// Dial a remote peer.
    pub async fn dial(addr: SocketAddr, peer_name: &str) -> Result<Self, TetherError> {
        let stream = TcpStream::connect(addr).await?;
        Self::establish(stream, peer_name)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &PeerDescriptor {
        &self.peer
    }

    /// Clonable outbound sender.
    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }

    /// Send one message over the link (suspends until the transport
    /// queue accepts the write, not until the peer acks).
    pub async fn send(&self, message: &Message) -> Result<(), TetherError> {
        let packet = Packet::from_message(message)?;
        self.tx.send(packet).await.map_err(TetherError::from)
    }

    /// Take the inbound message stream. Yields `None` after the first
    /// call; the registry is the single consumer.
    pub fn take_incoming(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.incoming.take()
    }

    /// Take the lifecycle-update stream (single consumer).
    pub fn take_lifecycle(&mut self) -> Option<mpsc::Receiver<ConnectionLifecycleState>> {
        self.lifecycle.take()
    }

    /// Cancel the link. Idempotent; the lifecycle stream reports
    /// `Cancelled` (or nothing if a failure already terminated it).
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // A dropped handle must not leave the heartbeat task keeping
        // the socket alive.
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────
