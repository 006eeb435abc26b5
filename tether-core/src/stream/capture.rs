//! Capture and encode pipeline.
//!
//! Turns a live raw-frame source into quality-adaptive
//! [`Message::PreviewFrame`]s on the outbound channel. Quality is a
//! push-based external input: the encode loop never waits for render
//! feedback, it only samples the latest level once per frame.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TetherError;
use crate::message::{Message, RenderState};
use crate::stream::payload::{EncodedUnit, RawFrame, VideoFramePayload};
use crate::stream::quality::QualityLevel;

// ── Collaborator traits ──────────────────────────────────────────

/// A live raw-frame producer (camera, screen grabber, test vector).
#[async_trait]
pub trait FrameSource: Send {
    /// Begin producing frames. Suspends until the source is live.
    async fn start(&mut self) -> Result<(), TetherError>;

    /// The next captured frame, or `None` once the source ends.
    async fn next_frame(&mut self) -> Option<RawFrame>;

    async fn stop(&mut self);
}

/// Downscales a frame by a quality factor, preserving aspect ratio
/// and pixel format.
pub trait FrameScaler: Send {
    fn scale(&self, frame: &RawFrame, factor: f32) -> Result<RawFrame, TetherError>;
}

/// Compressed-bitstream producer.
pub trait VideoEncoder: Send {
    fn configure(&mut self, config: EncoderConfig) -> Result<(), TetherError>;

    /// Encode one frame into zero or more bitstream units.
    fn encode(&mut self, frame: &RawFrame) -> Result<Vec<EncodedUnit>, TetherError>;

    /// The codec's current out-of-band parameter sets, available once
    /// the first key unit has been produced.
    fn parameter_sets(&self) -> Option<Vec<u8>>;
}

/// Encoder tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Emit a key unit at least every this many frames.
    pub max_key_unit_interval: u32,
    /// Trade compression ratio for latency.
    pub low_latency: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_key_unit_interval: 60,
            low_latency: true,
        }
    }
}

// ── CapturePipeline ──────────────────────────────────────────────

/// Drives `source → scale → encode → outbound` on its own task.
pub struct CapturePipeline {
    quality_tx: watch::Sender<QualityLevel>,
    outbound: mpsc::Sender<Message>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        let (quality_tx, _) = watch::channel(QualityLevel::High);
        Self {
            quality_tx,
            outbound,
            task: None,
        }
    }

    /// Current quality tier.
    pub fn quality(&self) -> QualityLevel {
        *self.quality_tx.borrow()
    }

    /// Override the quality tier; takes effect on the next frame.
    pub fn set_quality(&self, level: QualityLevel) {
        let _ = self.quality_tx.send(level);
    }

    /// Fold one render-state report from the peer into the quality
    /// tier: stable promotes, unstable demotes. Saturates at the ends.
    pub fn apply_report(&self, state: RenderState) {
        let current = self.quality();
        let next = match state {
            RenderState::Stable => current.promote(),
            RenderState::Unstable => current.demote(),
        };
        if next != current {
            info!(from = %current, to = %next, "quality adapted");
            let _ = self.quality_tx.send(next);
        }
    }

    /// Start the encode loop. Idempotent: a second call while running
    /// warns and does nothing.
    pub async fn start_capture<S, C, E>(
        &mut self,
        mut source: S,
        scaler: C,
        mut encoder: E,
        config: EncoderConfig,
    ) -> Result<(), TetherError>
    where
        S: FrameSource + 'static,
        C: FrameScaler + 'static,
        E: VideoEncoder + 'static,
    {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            warn!("capture already running, ignoring start");
            return Ok(());
        }

        encoder.configure(config)?;
        source.start().await?;

        let mut quality_rx = self.quality_tx.subscribe();
        let outbound = self.outbound.clone();

        self.task = Some(tokio::spawn(async move {
            while let Some(frame) = source.next_frame().await {
                let quality = *quality_rx.borrow_and_update();
                let payload = match encode_one(&scaler, &mut encoder, frame, quality) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "frame dropped");
                        continue;
                    }
                };
                if outbound.send(Message::PreviewFrame(payload)).await.is_err() {
                    debug!("outbound channel closed, capture ending");
                    break;
                }
            }
            source.stop().await;
        }));
        Ok(())
    }

    /// `true` while the encode loop is live.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Abort the encode loop.
    pub fn stop_capture(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

/// Scale (re-stamping with the original capture instant), encode, and
/// wrap one frame.
fn encode_one<C: FrameScaler, E: VideoEncoder>(
    scaler: &C,
    encoder: &mut E,
    frame: RawFrame,
    quality: QualityLevel,
) -> Result<VideoFramePayload, TetherError> {
    let original = frame.dimensions;
    let capture_timestamp_ms = frame.capture_timestamp_ms;

    let factor = quality.scale_factor();
    let scaled_frame = if factor < 1.0 {
        let mut scaled = scaler.scale(&frame, factor)?;
        scaled.capture_timestamp_ms = capture_timestamp_ms;
        scaled
    } else {
        frame
    };
    let scaled = scaled_frame.dimensions;

    let units = encoder.encode(&scaled_frame)?;
    let parameter_sets = if units.iter().any(|u| u.is_key) {
        encoder.parameter_sets()
    } else {
        None
    };

    Ok(VideoFramePayload {
        units,
        parameter_sets,
        original,
        scaled,
        quality,
        capture_timestamp_ms,
    })
}

// ── Tests ────────────────────────────────────────────────────────
