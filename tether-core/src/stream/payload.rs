//! Frame types flowing through the capture→encode→decode path.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::stream::quality::QualityLevel;

// ── Dimensions ───────────────────────────────────────────────────

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Scale both axes by `factor`, preserving aspect. Rounds down,
    /// never below 1×1.
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            width: ((self.width as f32 * factor) as u32).max(1),
            height: ((self.height as f32 * factor) as u32).max(1),
        }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of raw frame data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit blue/green/red/alpha.
    Bgra8,
    /// 8-bit red/green/blue/alpha.
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => 4,
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed frame produced by the capture collaborator.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub dimensions: Dimensions,
    pub format: PixelFormat,
    /// Tightly packed pixel rows (`width * bpp * height` bytes).
    pub data: Vec<u8>,
    /// Wall-clock capture instant in milliseconds since the Unix epoch.
    pub capture_timestamp_ms: u64,
}

impl RawFrame {
    /// Milliseconds since the Unix epoch, for capture timestamping.
    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Expected byte length for the frame's dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.dimensions.width as usize
            * self.dimensions.height as usize
            * self.format.bytes_per_pixel()
    }
}

// ── EncodedUnit ──────────────────────────────────────────────────

/// One compressed bitstream unit emitted by the encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedUnit {
    pub data: Vec<u8>,
    /// Key units can be decoded without reference to prior frames.
    pub is_key: bool,
}

// ── VideoFramePayload ────────────────────────────────────────────

/// Wire payload of one compressed video frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFramePayload {
    /// Compressed bitstream units for this frame.
    pub units: Vec<EncodedUnit>,
    /// Out-of-band codec parameter sets, attached on key-unit
    /// boundaries so the receiver can (re)initialize its decoder.
    pub parameter_sets: Option<Vec<u8>>,
    /// Dimensions as captured.
    pub original: Dimensions,
    /// Dimensions after quality scaling (equal to `original` at 1.0).
    pub scaled: Dimensions,
    /// Quality tier the frame was encoded at.
    pub quality: QualityLevel,
    /// Original capture instant, for receiver-side staleness checks.
    pub capture_timestamp_ms: u64,
}

impl VideoFramePayload {
    /// `true` when any unit in the payload is a key unit.
    pub fn has_key_unit(&self) -> bool {
        self.units.iter().any(|u| u.is_key)
    }

    /// Total compressed byte size across units.
    pub fn compressed_len(&self) -> usize {
        self.units.iter().map(|u| u.data.len()).sum()
    }
}

// ── PhotoResult ──────────────────────────────────────────────────

/// A full-quality still image captured on the host at the viewer's
/// request. Persistence happens outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoResult {
    pub dimensions: Dimensions,
    /// Encoded image bytes (format decided by the capture collaborator).
    pub data: Vec<u8>,
    pub capture_timestamp_ms: u64,
}

// ── Tests ────────────────────────────────────────────────────────
