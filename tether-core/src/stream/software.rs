//! Software reference codec.
//!
//! A zstd implementation of the encoder/decoder collaborators: every
//! unit is an independently compressed frame, key units are produced
//! on the configured interval, and the parameter sets carry the frame
//! geometry the decoder needs to reinitialize.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TetherError;
use crate::stream::capture::{EncoderConfig, VideoEncoder};
use crate::stream::payload::{Dimensions, EncodedUnit, PixelFormat, RawFrame};

/// zstd level used in low-latency mode.
const LEVEL_FAST: i32 = 1;
/// zstd level used when latency is not constrained.
const LEVEL_DENSE: i32 = 6;

// ── Parameter sets ───────────────────────────────────────────────

/// Geometry the decoder must know before it can decode any unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameParameters {
    pub dimensions: Dimensions,
    pub format: PixelFormat,
}

impl FrameParameters {
    pub fn to_bytes(&self) -> Result<Vec<u8>, TetherError> {
        bincode::serialize(self).map_err(|e| TetherError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TetherError> {
        bincode::deserialize(bytes).map_err(|e| TetherError::Encoding(e.to_string()))
    }
}

// ── SoftwareEncoder ──────────────────────────────────────────────

/// zstd-backed [`VideoEncoder`].
pub struct SoftwareEncoder {
    config: EncoderConfig,
    /// Frames since the last key unit.
    since_key: u32,
    /// Geometry of the last encoded frame, exposed as parameter sets.
    parameters: Option<FrameParameters>,
}

impl SoftwareEncoder {
    pub fn new() -> Self {
        Self {
            config: EncoderConfig::default(),
            since_key: 0,
            parameters: None,
        }
    }

    fn level(&self) -> i32 {
        if self.config.low_latency {
            LEVEL_FAST
        } else {
            LEVEL_DENSE
        }
    }
}

impl Default for SoftwareEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for SoftwareEncoder {
    fn configure(&mut self, config: EncoderConfig) -> Result<(), TetherError> {
        if config.max_key_unit_interval == 0 {
            return Err(TetherError::ProtocolViolation(
                "key unit interval must be at least 1",
            ));
        }
        self.config = config;
        self.since_key = 0;
        Ok(())
    }

    fn encode(&mut self, frame: &RawFrame) -> Result<Vec<EncodedUnit>, TetherError> {
        if frame.data.len() != frame.expected_len() {
            return Err(TetherError::Encoding(format!(
                "frame buffer is {} bytes, geometry says {}",
                frame.data.len(),
                frame.expected_len()
            )));
        }

        let parameters = FrameParameters {
            dimensions: frame.dimensions,
            format: frame.format,
        };
        // Geometry changes force a key unit so the decoder can
        // reinitialize from fresh parameter sets.
        let geometry_changed = self.parameters.is_some_and(|p| p != parameters);
        self.parameters = Some(parameters);

        let is_key = self.since_key == 0 || geometry_changed;
        self.since_key = if is_key {
            1
        } else if self.since_key + 1 >= self.config.max_key_unit_interval {
            0
        } else {
            self.since_key + 1
        };

        let data = zstd::bulk::compress(&frame.data, self.level())
            .map_err(|e| TetherError::Encoding(e.to_string()))?;
        debug!(
            raw = frame.data.len(),
            compressed = data.len(),
            is_key,
            "frame encoded"
        );
        Ok(vec![EncodedUnit { data, is_key }])
    }

    fn parameter_sets(&self) -> Option<Vec<u8>> {
        self.parameters.and_then(|p| p.to_bytes().ok())
    }
}

// ── SoftwareDecoder ──────────────────────────────────────────────

/// zstd-backed decoder; must be (re)initialized with parameter sets
/// before any unit can be decoded.
pub struct SoftwareDecoder {
    parameters: Option<FrameParameters>,
}

impl SoftwareDecoder {
    pub fn new() -> Self {
        Self { parameters: None }
    }

    /// (Re)initialize from the encoder's parameter sets.
    pub fn init_with_parameter_sets(&mut self, bytes: &[u8]) -> Result<(), TetherError> {
        self.parameters = Some(FrameParameters::from_bytes(bytes)?);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.parameters.is_some()
    }

    /// Decode one unit into a displayable frame.
    pub fn decode(
        &mut self,
        unit: &EncodedUnit,
        capture_timestamp_ms: u64,
    ) -> Result<RawFrame, TetherError> {
        let parameters = self
            .parameters
            .ok_or(TetherError::ProtocolViolation("decoder not initialized"))?;

        let expected = parameters.dimensions.width as usize
            * parameters.dimensions.height as usize
            * parameters.format.bytes_per_pixel();
        let data = zstd::bulk::decompress(&unit.data, expected)
            .map_err(|e| TetherError::Encoding(e.to_string()))?;
        if data.len() != expected {
            return Err(TetherError::Encoding(format!(
                "decoded {} bytes, geometry says {expected}",
                data.len()
            )));
        }

        Ok(RawFrame {
            dimensions: parameters.dimensions,
            format: parameters.format,
            data,
            capture_timestamp_ms,
        })
    }
}

impl Default for SoftwareDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
