//! # tether-core
//!
//! Core library for Tether, a paired-device live-streaming link: one
//! host captures and streams video to one viewer over a single duplex
//! connection, with receiver feedback adapting the stream quality.
//!
//! This crate contains:
//! - **Protocol types**: `PacketHeader`, `Packet`, `Message`, `ProtocolFlags`
//! - **Codec**: `TetherCodec` for framed TCP I/O via `tokio_util`
//! - **Net**: `Connection` with heartbeat, the `ConnectionRegistry`
//!   actor, and per-link bandwidth accounting
//! - **Session**: the orchestrator (advertise / browse), the derived
//!   `NetworkState` machine, and the `NetworkService` facade
//! - **Role**: host/viewer negotiation over a Lamport-style LWW
//!   register, plus the protocol version gate
//! - **Stream**: the capture→encode pipeline and the decode→render
//!   feedback loop with its staleness gate
//! - **Error**: `TetherError` — typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod net;
pub mod overlay;
pub mod packet;
pub mod role;
pub mod session;
pub mod stream;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::TetherCodec;
pub use error::TetherError;
pub use flags::ProtocolFlags;
pub use header::{HEADER_SIZE, PacketHeader};
pub use message::{Message, RenderState};
pub use net::{
    BandwidthEstimator, Connection, ConnectionId, ConnectionRegistry, ConnectionSender,
    PeerDescriptor, PerformanceReport, RegistryHandle,
};
pub use packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet};
pub use role::version::{Version, VersionInfo};
pub use role::{LwwRegister, RoleNegotiator, SessionRole};
pub use session::{NetworkService, NetworkState, PeerHandle, SessionEvent};
pub use stream::{
    CapturePipeline, EncoderConfig, QualityLevel, RawFrame, RenderGate, RenderLoop,
    SoftwareDecoder, SoftwareEncoder, VideoFramePayload,
};
