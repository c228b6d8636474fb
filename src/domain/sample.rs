//! Sensor samples consumed by the fusion engine.
//!
//! A [`VisionSample`] is produced per camera frame by the vision processor;
//! a [`BioSample`] is produced per heart-rate notification by the bio
//! monitor. Both are immutable once published. Validation here covers value
//! ranges only; freshness is the oracle's job.

use serde::{Deserialize, Serialize};

use crate::{FusionError, Result};

/// Eye/mouth geometry and fatigue counters extracted from one camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionSample {
    /// Average eye aspect ratio across both eyes, in (0, 1].
    pub avg_ear: f64,
    /// Mouth aspect ratio, in [0, 1].
    #[serde(default)]
    pub mar: f64,
    /// Whether the eyes are currently below the closure threshold.
    #[serde(default)]
    pub eyes_closed: bool,
    /// Duration of the current eye closure, seconds.
    #[serde(default)]
    pub closure_duration_s: f64,
    /// Microsleep events observed this session.
    #[serde(default)]
    pub microsleep_count: u32,
    /// Blink rate over the session, blinks per minute.
    #[serde(default)]
    pub blink_rate_per_minute: f64,
    /// Whether a yawn is currently in progress.
    #[serde(default)]
    pub yawning: bool,
    /// Completed yawns this session.
    #[serde(default)]
    pub yawn_count: u32,
    /// Duration of the current yawn, seconds (0 when not yawning).
    #[serde(default)]
    pub yawn_duration_s: f64,
    /// Capture time on the monotonic timeline, seconds.
    pub timestamp_s: f64,
}

impl VisionSample {
    /// Range-validate the sample.
    ///
    /// An EAR of exactly zero means the landmark extractor had no eyes to
    /// measure, so it is rejected along with out-of-range ratios and
    /// negative durations.
    pub fn validate(&self) -> Result<()> {
        if self.avg_ear <= 0.0 || self.avg_ear > 1.0 {
            return Err(FusionError::InvalidSample(format!(
                "avg_ear {} outside (0, 1]",
                self.avg_ear
            )));
        }
        if !(0.0..=1.0).contains(&self.mar) {
            return Err(FusionError::InvalidSample(format!(
                "mar {} outside [0, 1]",
                self.mar
            )));
        }
        if self.closure_duration_s < 0.0 {
            return Err(FusionError::InvalidSample(format!(
                "negative closure_duration_s {}",
                self.closure_duration_s
            )));
        }
        if self.blink_rate_per_minute < 0.0 {
            return Err(FusionError::InvalidSample(format!(
                "negative blink_rate_per_minute {}",
                self.blink_rate_per_minute
            )));
        }
        if self.yawn_duration_s < 0.0 {
            return Err(FusionError::InvalidSample(format!(
                "negative yawn_duration_s {}",
                self.yawn_duration_s
            )));
        }
        Ok(())
    }
}

/// Heart-rate metrics from the bio monitor.
///
/// The raw `hr` field is always present; the enhanced analysis fields are
/// populated only when the sensor delivered RR intervals long enough to
/// derive them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioSample {
    /// Heart rate, beats per minute.
    pub hr: u8,
    /// Most recent RR interval, seconds.
    #[serde(default)]
    pub rr_interval_s: Option<f64>,
    /// Root mean square of successive RR differences, milliseconds.
    #[serde(default)]
    pub rmssd_ms: Option<f64>,
    /// Heart-rate drift from a linear fit, bpm per minute.
    #[serde(default)]
    pub hr_trend_bpm_per_min: Option<f64>,
    /// Relative deviation from the pilot's baseline HR, in [0, 1].
    #[serde(default)]
    pub baseline_deviation: Option<f64>,
    /// Combined HR-elevation / HRV-reduction stress index, in [0, 1].
    #[serde(default)]
    pub stress_index: Option<f64>,
    /// Baseline heart rate the metrics were computed against.
    #[serde(default)]
    pub baseline_hr: Option<f64>,
    /// Baseline HRV (RMSSD, ms) the metrics were computed against.
    #[serde(default)]
    pub baseline_hrv: Option<f64>,
    /// Measurement time on the monotonic timeline, seconds.
    pub timestamp_s: f64,
}

impl BioSample {
    /// Range-validate the sample.
    pub fn validate(&self) -> Result<()> {
        if let Some(stress) = self.stress_index {
            if !(0.0..=1.0).contains(&stress) {
                return Err(FusionError::InvalidSample(format!(
                    "stress_index {stress} outside [0, 1]"
                )));
            }
        }
        if let Some(dev) = self.baseline_deviation {
            if !(0.0..=1.0).contains(&dev) {
                return Err(FusionError::InvalidSample(format!(
                    "baseline_deviation {dev} outside [0, 1]"
                )));
            }
        }
        if let Some(rmssd) = self.rmssd_ms {
            if rmssd < 0.0 {
                return Err(FusionError::InvalidSample(format!(
                    "negative rmssd_ms {rmssd}"
                )));
            }
        }
        if let Some(rr) = self.rr_interval_s {
            if rr < 0.0 {
                return Err(FusionError::InvalidSample(format!(
                    "negative rr_interval_s {rr}"
                )));
            }
        }
        Ok(())
    }

    /// True when at least one enhanced analysis field is populated.
    pub fn has_enhanced_metrics(&self) -> bool {
        self.stress_index.is_some()
            || self.rmssd_ms.is_some()
            || self.hr_trend_bpm_per_min.is_some()
            || self.baseline_deviation.is_some()
    }
}
