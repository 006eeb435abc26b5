//! Video path: capture and encode on the host, decode and render
//! feedback on the viewer, with quality adaptation closing the loop.

pub mod capture;
pub mod payload;
pub mod quality;
pub mod render;
pub mod software;

pub use capture::{CapturePipeline, EncoderConfig, FrameScaler, FrameSource, VideoEncoder};
pub use payload::{Dimensions, EncodedUnit, PhotoResult, PixelFormat, RawFrame, VideoFramePayload};
pub use quality::QualityLevel;
pub use render::{RenderGate, RenderLoop, STABILITY_WINDOW, STALENESS_THRESHOLD};
pub use software::{SoftwareDecoder, SoftwareEncoder};
