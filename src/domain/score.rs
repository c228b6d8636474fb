//! Score value object and the fusion output record.

use serde::{Deserialize, Serialize};

use super::{BioSample, VisionSample};

/// A normalized score in [0.0, 1.0].
///
/// Construction clamps, so a `Score` can never hold an out-of-range value.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f64);

impl Score {
    /// The zero score.
    pub const ZERO: Score = Score(0.0);
    /// The maximum score.
    pub const MAX: Score = Score(1.0);

    /// Create a score, clamping into [0.0, 1.0]. NaN clamps to zero.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Raw value.
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Result of one fusion tick.
///
/// Carries the smoothed (or, on the critical path, raw) fusion score, the
/// evidence-quality confidence, and a copy of the inputs for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionOutput {
    /// Fused fatigue score after smoothing (raw on the critical path).
    pub fusion_score: Score,
    /// Raw weighted score before smoothing.
    pub raw_score: Score,
    /// Confidence in the evidence behind this score.
    pub confidence: Score,
    /// Whether a critical condition bypassed smoothing this tick.
    pub is_critical_event: bool,
    /// Vision input consumed this tick, if any.
    pub vision: Option<VisionSample>,
    /// Biometric input consumed this tick, if any.
    pub bio: Option<BioSample>,
    /// Tick time on the monotonic timeline, seconds.
    pub timestamp_s: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_clamping() {
        assert_eq!(Score::new(1.5).value(), 1.0);
        assert_eq!(Score::new(-0.5).value(), 0.0);
        assert_eq!(Score::new(0.7).value(), 0.7);
        assert_eq!(Score::new(f64::NAN).value(), 0.0);
    }

    #[test]
    fn test_score_serializes_transparent() {
        let json = serde_json::to_string(&Score::new(0.25)).unwrap();
        assert_eq!(json, "0.25");
    }
}
