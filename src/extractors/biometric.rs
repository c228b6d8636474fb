//! Biometric feature extraction.
//!
//! Two paths: when the bio monitor delivered enhanced metrics (stress
//! index, RMSSD, HR trend, baseline deviation) they are blended with fixed
//! weights; when only a raw heart rate is available the score falls back
//! to relative deviation from the pilot's baseline.

use crate::domain::{BioSample, Score};
use crate::Result;

const STRESS_WEIGHT: f64 = 0.40;
const HRV_WEIGHT: f64 = 0.25;
const TREND_WEIGHT: f64 = 0.15;
const DEVIATION_WEIGHT: f64 = 0.20;

/// RMSSD below this is autonomic exhaustion territory regardless of
/// baseline.
const RMSSD_FLOOR_MS: f64 = 20.0;
const CRITICAL_STRESS: f64 = 0.75;
const CRITICAL_TREND_BPM_PER_MIN: f64 = 5.0;

/// Quality-bonus weights by enhanced field, used for fusion confidence.
const BONUS_STRESS: f64 = 0.35;
const BONUS_RMSSD: f64 = 0.30;
const BONUS_TREND: f64 = 0.20;
const BONUS_DEVIATION: f64 = 0.15;

/// Result of biometric feature extraction.
#[derive(Debug, Clone)]
pub struct BioAssessment {
    /// Weighted biometric fatigue score.
    pub score: Score,
    /// Whether a critical biometric condition is present.
    pub critical: bool,
    /// Completeness bonus in [0, 1], fed into fusion confidence.
    pub quality_bonus: f64,
}

/// Score a biometric sample against the pilot's baselines.
///
/// Baselines embedded in the sample win over the profile baselines passed
/// in, since they are the ones the producer's metrics were computed
/// against.
pub fn score(sample: &BioSample, profile_hr: f64, profile_hrv: f64) -> Result<BioAssessment> {
    sample.validate()?;

    let baseline_hr = sample.baseline_hr.unwrap_or(profile_hr);
    let baseline_hrv = sample.baseline_hrv.unwrap_or(profile_hrv);

    let score = if sample.has_enhanced_metrics() {
        enhanced_score(sample, baseline_hrv)
    } else {
        raw_hr_score(sample.hr, baseline_hr)
    };

    Ok(BioAssessment {
        score: Score::new(score),
        critical: is_critical(sample),
        quality_bonus: quality_bonus(sample),
    })
}

fn is_critical(sample: &BioSample) -> bool {
    sample.stress_index.is_some_and(|s| s >= CRITICAL_STRESS)
        || sample.rmssd_ms.is_some_and(|r| r < RMSSD_FLOOR_MS)
        || sample
            .hr_trend_bpm_per_min
            .is_some_and(|t| t > CRITICAL_TREND_BPM_PER_MIN)
}

/// Bonus accumulated from enhanced-field completeness. The weights sum to
/// 1.0 when every field is present.
fn quality_bonus(sample: &BioSample) -> f64 {
    let mut bonus = 0.0;
    if sample.stress_index.is_some() {
        bonus += BONUS_STRESS;
    }
    if sample.rmssd_ms.is_some() {
        bonus += BONUS_RMSSD;
    }
    if sample.hr_trend_bpm_per_min.is_some() {
        bonus += BONUS_TREND;
    }
    if sample.baseline_deviation.is_some() {
        bonus += BONUS_DEVIATION;
    }
    bonus
}

/// Weighted blend of the enhanced metrics. Absent fields contribute zero;
/// the confidence side accounts for the missing evidence.
fn enhanced_score(sample: &BioSample, baseline_hrv: f64) -> f64 {
    let stress = sample.stress_index.unwrap_or(0.0);
    let hrv = sample
        .rmssd_ms
        .map(|r| hrv_sub(r, baseline_hrv))
        .unwrap_or(0.0);
    let trend = sample
        .hr_trend_bpm_per_min
        .map(trend_sub)
        .unwrap_or(0.0);
    let deviation = sample
        .baseline_deviation
        .map(|d| (d * 2.0).min(1.0))
        .unwrap_or(0.0);

    stress * STRESS_WEIGHT + hrv * HRV_WEIGHT + trend * TREND_WEIGHT + deviation * DEVIATION_WEIGHT
}

/// HRV sub-score: 1.0 below the 20 ms floor, linear from 1.0 at the floor
/// down to 0.0 at the pilot's baseline, 0.0 above baseline.
fn hrv_sub(rmssd_ms: f64, baseline_hrv: f64) -> f64 {
    if rmssd_ms < RMSSD_FLOOR_MS {
        return 1.0;
    }
    if baseline_hrv <= RMSSD_FLOOR_MS {
        return 0.0;
    }
    ((baseline_hrv - rmssd_ms) / (baseline_hrv - RMSSD_FLOOR_MS)).clamp(0.0, 1.0)
}

/// Rising-HR sub-score: saturates at +5 bpm/min, zero for flat or falling.
fn trend_sub(trend_bpm_per_min: f64) -> f64 {
    if trend_bpm_per_min > CRITICAL_TREND_BPM_PER_MIN {
        1.0
    } else {
        (trend_bpm_per_min / CRITICAL_TREND_BPM_PER_MIN).clamp(0.0, 1.0)
    }
}

fn raw_hr_score(hr: u8, baseline_hr: f64) -> f64 {
    if baseline_hr <= 0.0 {
        return 0.0;
    }
    ((f64::from(hr) - baseline_hr).abs() / baseline_hr * 1.5).min(1.0)
}
