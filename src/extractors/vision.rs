//! Vision feature extraction.
//!
//! Maps one [`VisionSample`] to a bounded fatigue sub-score plus a critical
//! flag. The sub-score is a fixed-weight blend of five indicators:
//!
//! - eye aspect ratio (40%): droopy or closed eyes dominate the score
//! - eye-closure duration (25%)
//! - microsleep events (15%)
//! - yawning (15%): itself a frequency/duration/MAR blend
//! - blink rate (5%)
//!
//! The weights are fixed; only the inputs vary per frame.

use serde::{Deserialize, Serialize};

use crate::domain::{Score, VisionSample};
use crate::Result;

const EAR_WEIGHT: f64 = 0.40;
const CLOSURE_WEIGHT: f64 = 0.25;
const MICROSLEEP_WEIGHT: f64 = 0.15;
const YAWN_WEIGHT: f64 = 0.15;
const BLINK_WEIGHT: f64 = 0.05;

/// Critical thresholds. Any one of these bypasses smoothing downstream.
const CRITICAL_CLOSURE_S: f64 = 1.0;
const CRITICAL_EAR: f64 = 0.15;
const CRITICAL_MICROSLEEPS: u32 = 2;
const CRITICAL_YAWN_COUNT: u32 = 3;
const CRITICAL_YAWN_DURATION_S: f64 = 2.0;

/// Per-indicator sub-scores, kept for telemetry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VisionDiagnostics {
    /// Eye-aspect-ratio sub-score.
    pub ear_sub: f64,
    /// Closure-duration sub-score.
    pub closure_sub: f64,
    /// Microsleep sub-score.
    pub microsleep_sub: f64,
    /// Yawn sub-score.
    pub yawn_sub: f64,
    /// Blink-rate sub-score.
    pub blink_sub: f64,
}

/// Result of vision feature extraction.
#[derive(Debug, Clone)]
pub struct VisionAssessment {
    /// Weighted vision fatigue score.
    pub score: Score,
    /// Whether a critical vision condition is present.
    pub critical: bool,
    /// Per-indicator breakdown.
    pub diagnostics: VisionDiagnostics,
}

/// Score a vision sample.
///
/// Validates ranges first; freshness is checked by the caller against the
/// oracle before the sample gets here.
pub fn score(sample: &VisionSample) -> Result<VisionAssessment> {
    sample.validate()?;

    let diagnostics = VisionDiagnostics {
        ear_sub: ear_sub(sample.avg_ear),
        closure_sub: closure_sub(sample.closure_duration_s),
        microsleep_sub: microsleep_sub(sample.microsleep_count),
        yawn_sub: yawn_sub(sample),
        blink_sub: blink_sub(sample.blink_rate_per_minute),
    };

    let weighted = diagnostics.ear_sub * EAR_WEIGHT
        + diagnostics.closure_sub * CLOSURE_WEIGHT
        + diagnostics.microsleep_sub * MICROSLEEP_WEIGHT
        + diagnostics.yawn_sub * YAWN_WEIGHT
        + diagnostics.blink_sub * BLINK_WEIGHT;

    Ok(VisionAssessment {
        score: Score::new(weighted),
        critical: is_critical(sample),
        diagnostics,
    })
}

/// Any single condition here is an unambiguous safety event.
fn is_critical(sample: &VisionSample) -> bool {
    sample.closure_duration_s >= CRITICAL_CLOSURE_S
        || sample.avg_ear < CRITICAL_EAR
        || sample.microsleep_count >= CRITICAL_MICROSLEEPS
        || (sample.yawn_count >= CRITICAL_YAWN_COUNT
            && sample.yawn_duration_s > CRITICAL_YAWN_DURATION_S)
}

/// Piecewise EAR mapping. Open eyes sit around 0.25-0.35; the score ramps
/// steeply once the lids start dropping below 0.25.
fn ear_sub(avg_ear: f64) -> f64 {
    let sub = if avg_ear < 0.15 {
        1.0
    } else if avg_ear < 0.20 {
        0.8 + ((0.20 - avg_ear) / 0.05) * 0.2
    } else if avg_ear < 0.25 {
        ((0.25 - avg_ear) / 0.05) * 0.8
    } else {
        (0.30 - avg_ear) / 0.20
    };
    sub.clamp(0.0, 1.0)
}

fn closure_sub(closure_s: f64) -> f64 {
    let sub = if closure_s < 0.5 {
        0.0
    } else if closure_s < 1.0 {
        0.5
    } else if closure_s < 3.0 {
        0.5 + (closure_s - 1.0) * 0.25
    } else {
        1.0
    };
    sub.clamp(0.0, 1.0)
}

fn microsleep_sub(count: u32) -> f64 {
    (f64::from(count) * 0.3).min(1.0)
}

/// Yawn blend: frequency 50%, current duration 30%, mouth openness 20%.
fn yawn_sub(sample: &VisionSample) -> f64 {
    let frequency = match sample.yawn_count {
        0 => 0.0,
        1..=2 => f64::from(sample.yawn_count) * 0.3,
        3..=4 => 0.6 + f64::from(sample.yawn_count - 3) * 0.2,
        _ => 1.0,
    };

    let duration = if !sample.yawning {
        0.0
    } else {
        let d = sample.yawn_duration_s;
        if d < 1.0 {
            0.2
        } else if d < 2.0 {
            d * 0.5
        } else if d < 4.0 {
            0.5 + (d - 2.0) * 0.25
        } else {
            1.0
        }
    };

    let mar = {
        let m = sample.mar;
        if m < 0.35 {
            0.0
        } else if m < 0.5 {
            (m - 0.35) * 3.33
        } else if m < 0.6 {
            (m - 0.5) * 10.0
        } else {
            1.0
        }
    };

    (frequency * 0.5 + duration * 0.3 + mar * 0.2).clamp(0.0, 1.0)
}

/// Blink-rate mapping. Both too-few and too-many blinks score; the normal
/// band in between scores zero.
fn blink_sub(rate: f64) -> f64 {
    let sub = if rate < 5.0 {
        1.0
    } else if rate < 10.0 {
        (10.0 - rate) / 5.0
    } else if rate > 40.0 {
        (rate - 40.0) / 20.0
    } else {
        0.0
    };
    sub.clamp(0.0, 1.0)
}
