//! Transport layer: framed connections, their lifecycle, the
//! registry that owns them, and per-link bandwidth accounting.

pub mod bandwidth;
pub mod connection;
pub mod lifecycle;
pub mod registry;

pub use bandwidth::{BandwidthEstimator, PerformanceReport};
pub use connection::{Connection, ConnectionId, ConnectionSender, PeerDescriptor};
pub use lifecycle::{lifecycle_effects, ConnectionLifecycleState, LifecycleEffect};
pub use registry::{ConnectionRegistry, RegistryHandle};
