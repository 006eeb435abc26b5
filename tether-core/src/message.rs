//! The single tagged wire union exchanged between the two peers.
//!
//! Control messages (session wake-up, ping, health checks, version
//! exchange, disconnect notice) and domain messages (video frames,
//! render feedback, photo results, overlays, role changes) all travel
//! as [`Message`] values multiplexed onto the same link. Within one
//! connection order is preserved; there is no global ordering between
//! control traffic and video frames.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::TetherError;
use crate::flags::ProtocolFlags;
use crate::overlay::OverlayUpdate;
use crate::role::version::VersionInfo;
use crate::role::RoleChangePayload;
use crate::stream::payload::{PhotoResult, VideoFramePayload};

// ── RenderState ──────────────────────────────────────────────────

/// Receiver-side verdict on rendering timeliness, fed back to the
/// sender to drive quality adaptation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderState {
    /// A full stability window of on-time frames was observed.
    Stable,
    /// A frame arrived too late to draw.
    Unstable,
}

// ── Message ──────────────────────────────────────────────────────

/// Every payload that can cross the wire.
///
/// All cases carry only primitive/struct payloads — no transport
/// types — so the union round-trips through bincode unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // ── Control ──────────────────────────────────────────────────
    /// Viewer → host wake-up sent as soon as the link becomes ready.
    StartSession,
    /// Periodic keep-alive.
    Ping { timestamp_ms: u64 },
    /// Graceful-teardown notice sent before closing the link.
    WillDisconnect,
    /// RTT probe.
    HealthCheckRequest { timestamp_ms: u64 },
    /// Probe answer echoing the request timestamp.
    HealthCheckResponse { echo_timestamp_ms: u64 },
    /// Version gate; a mismatch in either direction ends the session.
    VersionExchange(VersionInfo),

    // ── Domain ───────────────────────────────────────────────────
    /// One compressed video frame.
    PreviewFrame(VideoFramePayload),
    /// Render-timeliness feedback closing the adaptive loop.
    RenderStateReport(RenderState),
    /// Full-quality still capture result.
    PhotoResult(PhotoResult),
    /// Drawing / composition-frame overlay mutation.
    OverlayUpdate(OverlayUpdate),
    /// Role swap request resolved by the LWW register it carries.
    RoleChangeRequest(RoleChangePayload),
}

impl Message {
    /// A ping stamped with the current wall clock.
    pub fn ping_now() -> Self {
        Self::Ping {
            timestamp_ms: epoch_ms(),
        }
    }

    /// A health-check probe stamped with the current wall clock.
    pub fn health_check_now() -> Self {
        Self::HealthCheckRequest {
            timestamp_ms: epoch_ms(),
        }
    }

    /// Flags the packet layer should carry for this message.
    pub fn flags(&self) -> ProtocolFlags {
        match self {
            Self::PreviewFrame(_) => ProtocolFlags::STREAMING,
            Self::StartSession
            | Self::Ping { .. }
            | Self::WillDisconnect
            | Self::HealthCheckRequest { .. }
            | Self::HealthCheckResponse { .. }
            | Self::VersionExchange(_)
            | Self::RoleChangeRequest(_) => ProtocolFlags::CONTROL,
            Self::RenderStateReport(_) | Self::PhotoResult(_) | Self::OverlayUpdate(_) => {
                ProtocolFlags::empty()
            }
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TetherError> {
        bincode::serialize(self).map_err(|e| TetherError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TetherError> {
        bincode::deserialize(bytes).map_err(|e| TetherError::Encoding(e.to_string()))
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ────────────────────────────────────────────────────────
