//! Domain-specific error types for the tether protocol.
//!
//! All fallible operations return `Result<T, TetherError>`.
//! No panics on invalid input — every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the tether protocol.
#[derive(Debug, Error)]
pub enum TetherError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the TTH0 magic sequence.
    #[error("invalid magic bytes: expected TTH0")]
    InvalidMagic,

    /// The packet payload failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet or message violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The peer's declared version is below our minimum (or vice versa).
    ///
    /// Fatal to the session, not to the process: the facade turns this
    /// into a user-visible `stop`.
    #[error("incompatible peer version: requires at least {required}, peer has {actual}")]
    VersionIncompatible { required: String, actual: String },

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Media Errors ─────────────────────────────────────────────
    /// The compressed bitstream could not be decoded.
    ///
    /// The render loop logs this, keeps the previous displayable frame,
    /// and leaves the decoder running.
    #[error("codec error: {0}")]
    Codec(String),

    /// A frame could not be scaled to the requested quality level.
    #[error("scale error: {0}")]
    Scale(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for TetherError {
    fn from(s: String) -> Self {
        TetherError::Other(s)
    }
}

impl From<&str> for TetherError {
    fn from(s: &str) -> Self {
        TetherError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TetherError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TetherError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for TetherError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        TetherError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = TetherError::InvalidMagic;
        assert!(e.to_string().contains("magic"));

        let e = TetherError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn version_incompatible_names_required_version() {
        let e = TetherError::VersionIncompatible {
            required: "1.2.0".into(),
            actual: "1.1.0".into(),
        };
        assert!(e.to_string().contains("1.2.0"));
        assert!(e.to_string().contains("1.1.0"));
    }

    #[test]
    fn from_string() {
        let e: TetherError = "something broke".into();
        assert!(matches!(e, TetherError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: TetherError = io_err.into();
        assert!(matches!(e, TetherError::Connection(_)));
    }
}
