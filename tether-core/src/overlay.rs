//! Drawing and frame overlays shared between the peers.
//!
//! Overlays use deliberately simple merge semantics: strokes are
//! additive, the frame overlay is replace-wholesale, `Clear` empties
//! everything. No CRDT machinery beyond that.

use serde::{Deserialize, Serialize};

// ── Overlay kinds ────────────────────────────────────────────────

/// A freehand drawing stroke in normalized frame coordinates (0..=1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeOverlay {
    pub points: Vec<(f32, f32)>,
    /// Packed 0xRRGGBBAA color.
    pub color: u32,
    /// Stroke width relative to the frame height.
    pub width: f32,
}

/// A composition-guide frame drawn over the preview.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameOverlay {
    /// Normalized rectangle `(x, y, w, h)` within the preview.
    pub rect: (f32, f32, f32, f32),
    /// Packed 0xRRGGBBAA color.
    pub color: u32,
}

/// One overlay mutation sent across the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OverlayUpdate {
    /// Append a stroke (additive).
    Stroke(StrokeOverlay),
    /// Replace the composition frame.
    Frame(FrameOverlay),
    /// Remove all overlays.
    Clear,
}

// ── OverlayState ─────────────────────────────────────────────────

/// Accumulated overlay state on either side of the link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayState {
    strokes: Vec<StrokeOverlay>,
    frame: Option<FrameOverlay>,
}

impl OverlayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update with additive/replace semantics.
    pub fn apply(&mut self, update: OverlayUpdate) {
        match update {
            OverlayUpdate::Stroke(stroke) => self.strokes.push(stroke),
            OverlayUpdate::Frame(frame) => self.frame = Some(frame),
            OverlayUpdate::Clear => {
                self.strokes.clear();
                self.frame = None;
            }
        }
    }

    pub fn strokes(&self) -> &[StrokeOverlay] {
        &self.strokes
    }

    pub fn frame(&self) -> Option<&FrameOverlay> {
        self.frame.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.frame.is_none()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke() -> StrokeOverlay {
        StrokeOverlay {
            points: vec![(0.1, 0.1), (0.2, 0.3)],
            color: 0xFF0000FF,
            width: 0.01,
        }
    }

    #[test]
    fn strokes_accumulate() {
        let mut state = OverlayState::new();
        state.apply(OverlayUpdate::Stroke(stroke()));
        state.apply(OverlayUpdate::Stroke(stroke()));
        assert_eq!(state.strokes().len(), 2);
    }

    #[test]
    fn frame_replaces() {
        let mut state = OverlayState::new();
        state.apply(OverlayUpdate::Frame(FrameOverlay {
            rect: (0.0, 0.0, 1.0, 1.0),
            color: 1,
        }));
        state.apply(OverlayUpdate::Frame(FrameOverlay {
            rect: (0.1, 0.1, 0.8, 0.8),
            color: 2,
        }));
        assert_eq!(state.frame().unwrap().color, 2);
    }

    #[test]
    fn clear_empties_everything() {
        let mut state = OverlayState::new();
        state.apply(OverlayUpdate::Stroke(stroke()));
        state.apply(OverlayUpdate::Frame(FrameOverlay {
            rect: (0.0, 0.0, 1.0, 1.0),
            color: 1,
        }));
        state.apply(OverlayUpdate::Clear);
        assert!(state.is_empty());
    }
}
