//! Decode and render feedback loop.
//!
//! The receiving side of the adaptive stream: decode incoming payloads
//! into a "latest frame" slot, and let the render driver pull from it
//! on its own cadence. Per pulled frame the [`RenderGate`] measures
//! `now - capture_timestamp` against the staleness threshold and
//! produces the stability reports that drive the sender's quality.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::{Message, RenderState};
use crate::stream::payload::{RawFrame, VideoFramePayload};
use crate::stream::quality::QualityLevel;
use crate::stream::software::SoftwareDecoder;

/// A frame older than this at render time is considered late.
pub const STALENESS_THRESHOLD: Duration = Duration::from_millis(1000 / 3);

/// Consecutive on-time frames required before reporting stable.
pub const STABILITY_WINDOW: u32 = 150;

// ── RenderGate ───────────────────────────────────────────────────

/// What the driver should do with one pulled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub draw: bool,
    pub report: Option<RenderState>,
}

/// Pure staleness/stability bookkeeping.
///
/// Late frames are dropped and reported unstable — except at the
/// quality floor, where dropping would leave nothing to improve, so
/// the frame is drawn anyway. Exactly one stable report is emitted
/// per full window of on-time frames, after which the count restarts.
#[derive(Debug)]
pub struct RenderGate {
    threshold: Duration,
    window: u32,
    consecutive: u32,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::with_limits(STALENESS_THRESHOLD, STABILITY_WINDOW)
    }

    pub fn with_limits(threshold: Duration, window: u32) -> Self {
        Self {
            threshold,
            window,
            consecutive: 0,
        }
    }

    /// On-time frames seen since the last report or late frame.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Judge one frame of the given age and quality.
    pub fn evaluate(&mut self, age: Duration, quality: QualityLevel) -> GateOutcome {
        if age > self.threshold {
            self.consecutive = 0;
            return GateOutcome {
                draw: quality.is_floor(),
                report: Some(RenderState::Unstable),
            };
        }

        self.consecutive += 1;
        let report = if self.consecutive >= self.window {
            self.consecutive = 0;
            Some(RenderState::Stable)
        } else {
            None
        };
        GateOutcome { draw: true, report }
    }
}

impl Default for RenderGate {
    fn default() -> Self {
        Self::new()
    }
}

// ── RenderLoop ───────────────────────────────────────────────────

/// A decoded frame waiting for the render driver.
#[derive(Debug)]
pub struct DecodedFrame {
    pub frame: RawFrame,
    pub quality: QualityLevel,
    pub capture_timestamp_ms: u64,
}

/// Consumes [`VideoFramePayload`]s and feeds the render driver.
pub struct RenderLoop {
    decoder: SoftwareDecoder,
    gate: RenderGate,
    /// Most recent successfully decoded frame, replaced per payload.
    latest: Option<DecodedFrame>,
    /// Parameter sets the decoder is currently initialized with.
    active_parameters: Option<Vec<u8>>,
    /// Feedback path back to the sender.
    outbound: mpsc::Sender<Message>,
}

impl RenderLoop {
    pub fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            decoder: SoftwareDecoder::new(),
            gate: RenderGate::new(),
            latest: None,
            active_parameters: None,
            outbound,
        }
    }

    #[cfg(test)]
    fn with_gate(outbound: mpsc::Sender<Message>, gate: RenderGate) -> Self {
        Self {
            gate,
            ..Self::new(outbound)
        }
    }

    /// Decode one payload into the latest-frame slot.
    ///
    /// Decoding failures are logged and the previous displayable
    /// frame remains current; the failed unit is never retried.
    pub fn on_frame_received(&mut self, payload: VideoFramePayload) {
        if let Some(parameters) = &payload.parameter_sets {
            if self.active_parameters.as_deref() != Some(parameters.as_slice()) {
                match self.decoder.init_with_parameter_sets(parameters) {
                    Ok(()) => {
                        debug!("decoder reinitialized from new parameter sets");
                        self.active_parameters = Some(parameters.clone());
                    }
                    Err(e) => {
                        warn!(error = %e, "bad parameter sets, keeping decoder state");
                        return;
                    }
                }
            }
        }

        let mut decoded = None;
        for unit in &payload.units {
            match self.decoder.decode(unit, payload.capture_timestamp_ms) {
                Ok(frame) => decoded = Some(frame),
                Err(e) => warn!(error = %e, "unit dropped"),
            }
        }

        if let Some(frame) = decoded {
            self.latest = Some(DecodedFrame {
                frame,
                quality: payload.quality,
                capture_timestamp_ms: payload.capture_timestamp_ms,
            });
        }
    }

    /// The render driver's pull: judge the latest undrawn frame
    /// against `now_ms`, queue any report, and return the frame to
    /// draw (if any).
    pub fn tick(&mut self, now_ms: u64) -> Option<DecodedFrame> {
        let decoded = self.latest.take()?;
        let age = Duration::from_millis(now_ms.saturating_sub(decoded.capture_timestamp_ms));
        let outcome = self.gate.evaluate(age, decoded.quality);

        if let Some(report) = outcome.report {
            // Driver cadence must never block on the network.
            if self
                .outbound
                .try_send(Message::RenderStateReport(report))
                .is_err()
            {
                debug!("report channel full, feedback dropped");
            }
        }

        outcome.draw.then_some(decoded)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::capture::{EncoderConfig, VideoEncoder};
    use crate::stream::payload::{Dimensions, PixelFormat};
    use crate::stream::software::SoftwareEncoder;

    const ON_TIME: Duration = Duration::from_millis(10);
    const LATE: Duration = Duration::from_millis(500);

    #[test]
    fn late_frame_is_dropped_and_reported_unstable() {
        let mut gate = RenderGate::new();
        let outcome = gate.evaluate(LATE, QualityLevel::High);
        assert!(!outcome.draw);
        assert_eq!(outcome.report, Some(RenderState::Unstable));
    }

    #[test]
    fn late_frame_at_the_floor_is_still_drawn() {
        let mut gate = RenderGate::new();
        let outcome = gate.evaluate(LATE, QualityLevel::VeryLow);
        assert!(outcome.draw, "veryLow has nothing left to demote to");
        assert_eq!(outcome.report, Some(RenderState::Unstable));
    }

    #[test]
    fn exactly_one_stable_report_per_window() {
        let mut gate = RenderGate::new();
        let mut reports = 0;
        for i in 1..=STABILITY_WINDOW {
            let outcome = gate.evaluate(ON_TIME, QualityLevel::High);
            assert!(outcome.draw);
            if outcome.report.is_some() {
                assert_eq!(outcome.report, Some(RenderState::Stable));
                assert_eq!(i, STABILITY_WINDOW, "stable only at the window edge");
                reports += 1;
            }
        }
        assert_eq!(reports, 1);
        assert_eq!(gate.consecutive(), 0, "counter resets after the report");
    }

    #[test]
    fn late_frame_resets_the_window() {
        let mut gate = RenderGate::new();
        for _ in 0..100 {
            gate.evaluate(ON_TIME, QualityLevel::High);
        }
        gate.evaluate(LATE, QualityLevel::High);
        assert_eq!(gate.consecutive(), 0);
    }

    #[test]
    fn boundary_age_is_on_time() {
        let mut gate = RenderGate::new();
        let outcome = gate.evaluate(STALENESS_THRESHOLD, QualityLevel::High);
        assert!(outcome.draw, "exactly at the threshold is not late");
    }

    fn encoded_payload(encoder: &mut SoftwareEncoder, timestamp_ms: u64) -> VideoFramePayload {
        let frame = RawFrame {
            dimensions: Dimensions::new(16, 8),
            format: PixelFormat::Bgra8,
            data: vec![0x11; 16 * 8 * 4],
            capture_timestamp_ms: timestamp_ms,
        };
        let units = encoder.encode(&frame).unwrap();
        let parameter_sets = units
            .iter()
            .any(|u| u.is_key)
            .then(|| encoder.parameter_sets().unwrap());
        VideoFramePayload {
            units,
            parameter_sets,
            original: frame.dimensions,
            scaled: frame.dimensions,
            quality: QualityLevel::High,
            capture_timestamp_ms: timestamp_ms,
        }
    }

    #[test]
    fn decoded_frames_reach_the_driver() {
        let (tx, _rx) = mpsc::channel(8);
        let mut render = RenderLoop::new(tx);
        let mut encoder = SoftwareEncoder::new();
        encoder.configure(EncoderConfig::default()).unwrap();

        let now = 10_000;
        render.on_frame_received(encoded_payload(&mut encoder, now));

        let drawn = render.tick(now + 20).expect("on-time frame must draw");
        assert_eq!(drawn.frame.dimensions, Dimensions::new(16, 8));
        assert_eq!(drawn.capture_timestamp_ms, now);

        // The slot is consumed; nothing new means nothing to judge.
        assert!(render.tick(now + 30).is_none());
    }

    #[test]
    fn corrupt_payload_keeps_the_previous_frame() {
        let (tx, _rx) = mpsc::channel(8);
        let mut render = RenderLoop::new(tx);
        let mut encoder = SoftwareEncoder::new();
        encoder.configure(EncoderConfig::default()).unwrap();

        render.on_frame_received(encoded_payload(&mut encoder, 1_000));

        let mut corrupt = encoded_payload(&mut encoder, 2_000);
        for unit in &mut corrupt.units {
            unit.data = vec![0xFF; 16];
        }
        render.on_frame_received(corrupt);

        let drawn = render.tick(1_010).expect("previous frame stays current");
        assert_eq!(drawn.capture_timestamp_ms, 1_000);
    }

    // The end-to-end staleness scenario: four frames stamped
    // [now, now, now-0.5s, now]; the third is dropped with one
    // unstable report, which demotes the sender one step.
    #[test]
    fn half_second_old_frame_triggers_one_unstable_report() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut render = RenderLoop::new(tx);
        let mut encoder = SoftwareEncoder::new();
        encoder.configure(EncoderConfig::default()).unwrap();

        let now = 100_000;
        let stamps = [now, now, now - 500, now];
        let mut drawn = 0;
        for stamp in stamps {
            render.on_frame_received(encoded_payload(&mut encoder, stamp));
            if render.tick(now).is_some() {
                drawn += 1;
            }
        }
        assert_eq!(drawn, 3, "only the stale frame is dropped");

        assert_eq!(
            rx.try_recv().ok(),
            Some(Message::RenderStateReport(RenderState::Unstable))
        );
        assert!(rx.try_recv().is_err(), "exactly one report");

        // Closing the loop: the sender demotes on the report.
        let (quality_tx, _q) = mpsc::channel(4);
        let pipeline = crate::stream::capture::CapturePipeline::new(quality_tx);
        pipeline.apply_report(RenderState::Unstable);
        assert_eq!(pipeline.quality(), QualityLevel::Medium);
    }

    #[test]
    fn small_window_emits_stable_through_the_loop() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut render =
            RenderLoop::with_gate(tx, RenderGate::with_limits(STALENESS_THRESHOLD, 3));
        let mut encoder = SoftwareEncoder::new();
        encoder.configure(EncoderConfig::default()).unwrap();

        let now = 50_000;
        for _ in 0..3 {
            render.on_frame_received(encoded_payload(&mut encoder, now));
            render.tick(now + 1);
        }

        assert_eq!(
            rx.try_recv().ok(),
            Some(Message::RenderStateReport(RenderState::Stable))
        );
    }
}
