//! Per-packet protocol flags.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in the packet header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtocolFlags: u64 {
        /// Packet belongs to the continuous video stream (best-effort,
        /// droppable by the receiver).
        const STREAMING = 0x1;
        /// Packet is session-control traffic (role, version, health).
        const CONTROL = 0x2;
    }
}
