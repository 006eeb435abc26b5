//! Session layer: link formation, derived connection state, and the
//! facade that higher-level features talk to.

pub mod events;
pub mod orchestrator;
pub mod service;
pub mod state;

pub use events::{SessionEvent, SessionEventSender};
pub use orchestrator::{PeerHandle, SessionOrchestrator};
pub use service::{NetworkService, VERSION_EXCHANGE_TIMEOUT};
pub use state::{transition, HostPhase, NetworkState, StateEffect, StateEvent, ViewerPhase};
