//! Discrete quality tiers for the outgoing video stream.

use serde::{Deserialize, Serialize};

/// Quality tier applied to outgoing video, adjusted by receiver
/// feedback. Ordered `High > Medium > Low > VeryLow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl QualityLevel {
    /// Linear downscale factor applied to captured frames at this tier.
    pub fn scale_factor(self) -> f32 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.75,
            Self::Low => 0.5,
            Self::VeryLow => 0.25,
        }
    }

    /// One tier better; saturates at `High`.
    pub fn promote(self) -> Self {
        match self {
            Self::High | Self::Medium => Self::High,
            Self::Low => Self::Medium,
            Self::VeryLow => Self::Low,
        }
    }

    /// One tier worse; saturates at `VeryLow`.
    pub fn demote(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium => Self::Low,
            Self::Low | Self::VeryLow => Self::VeryLow,
        }
    }

    /// `true` at the bottom tier, where late frames are still drawn to
    /// avoid a frozen screen.
    pub fn is_floor(self) -> bool {
        matches!(self, Self::VeryLow)
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::VeryLow => write!(f, "veryLow"),
        }
    }
}
