//! Local session events.
//!
//! Both the orchestrator (advertise/browse progress) and the registry
//! (per-connection lifecycle) report through this one event union; the
//! facade consumes it to derive [`NetworkState`](crate::session::state::NetworkState).
//! Events travel over explicit typed channels handed to the components
//! that need them — there is no global event bus.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::net::bandwidth::PerformanceReport;
use crate::net::connection::{ConnectionId, PeerDescriptor};

/// Sender half of the session event channel.
pub type SessionEventSender = mpsc::Sender<SessionEvent>;

/// One locally observed session event.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    // ── Orchestrator ─────────────────────────────────────────────
    /// The host-side advertiser is accepting connections on
    /// `local_addr`.
    ListenerRunning { local_addr: SocketAddr },
    /// The advertiser stopped (`None` reason = clean shutdown).
    ListenerStopped { reason: Option<String> },
    /// The viewer-side browser is discovering endpoints.
    BrowserRunning,
    /// The browser stopped (`None` reason = clean shutdown).
    BrowserStopped { reason: Option<String> },
    /// The viewer selected an endpoint and is dialing it.
    Connecting,

    // ── Registry ─────────────────────────────────────────────────
    /// A tracked connection became ready.
    ConnectionReady {
        id: ConnectionId,
        peer: PeerDescriptor,
    },
    /// A previously ready connection was stopped.
    ///
    /// `reason` is `Some` for failures and `None` for local cancels.
    ConnectionStopped {
        id: ConnectionId,
        peer: PeerDescriptor,
        reason: Option<String>,
    },
    /// Fresh link-quality snapshot from a monitor tick.
    Performance {
        id: ConnectionId,
        peer: PeerDescriptor,
        report: PerformanceReport,
    },
}
