//! Pilot profile and alert sensitivity.

use serde::{Deserialize, Serialize};

/// Default baseline heart rate when no profile is available, bpm.
pub const DEFAULT_BASELINE_HR: f64 = 72.0;
/// Default baseline HRV (RMSSD) when no profile is available, ms.
pub const DEFAULT_BASELINE_HRV: f64 = 45.0;

/// Per-pilot alert sensitivity.
///
/// Multiplies every stage threshold: a high-sensitivity profile alerts
/// earlier (lower thresholds), a low-sensitivity profile later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Alert early (thresholds x0.7).
    High,
    /// Standard thresholds (x1.0).
    Medium,
    /// Alert late (thresholds x1.3).
    Low,
}

impl Sensitivity {
    /// Factor applied to all stage thresholds.
    pub fn threshold_multiplier(&self) -> f64 {
        match self {
            Sensitivity::High => 0.7,
            Sensitivity::Medium => 1.0,
            Sensitivity::Low => 1.3,
        }
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Sensitivity::Medium
    }
}

/// Pilot profile as published on the bus.
///
/// Only the baseline vitals and sensitivity matter to the fusion engine;
/// everything else the profile service publishes rides along in `extras`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotProfile {
    /// Pilot identifier.
    pub id: String,
    /// Resting heart rate baseline, bpm.
    #[serde(default = "default_baseline_hr")]
    pub baseline_hr: f64,
    /// HRV (RMSSD) baseline, ms.
    #[serde(default = "default_baseline_hrv")]
    pub baseline_hrv: f64,
    /// Alert sensitivity, if the profile sets one.
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
    /// Fields opaque to the fusion engine.
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

fn default_baseline_hr() -> f64 {
    DEFAULT_BASELINE_HR
}

fn default_baseline_hrv() -> f64 {
    DEFAULT_BASELINE_HRV
}

impl PilotProfile {
    /// Minimal profile with default baselines.
    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            baseline_hr: DEFAULT_BASELINE_HR,
            baseline_hrv: DEFAULT_BASELINE_HRV,
            sensitivity: None,
            extras: serde_json::Map::new(),
        }
    }

    /// Effective sensitivity (Medium when the profile sets none).
    pub fn effective_sensitivity(&self) -> Sensitivity {
        self.sensitivity.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitivity_multipliers() {
        assert_eq!(Sensitivity::High.threshold_multiplier(), 0.7);
        assert_eq!(Sensitivity::Medium.threshold_multiplier(), 1.0);
        assert_eq!(Sensitivity::Low.threshold_multiplier(), 1.3);
    }

    #[test]
    fn test_profile_defaults() {
        let profile = PilotProfile::with_defaults("p-001");
        assert_eq!(profile.baseline_hr, 72.0);
        assert_eq!(profile.baseline_hrv, 45.0);
        assert_eq!(profile.effective_sensitivity(), Sensitivity::Medium);
    }

    #[test]
    fn test_profile_extras_roundtrip() {
        let value = serde_json::json!({
            "id": "p-002",
            "baseline_hr": 65.0,
            "baseline_hrv": 52.0,
            "sensitivity": "high",
            "name": "Jane Doe",
            "flight_hours": 3200.0
        });
        let profile: PilotProfile = serde_json::from_value(value).unwrap();
        assert_eq!(profile.sensitivity, Some(Sensitivity::High));
        assert_eq!(profile.extras["name"], "Jane Doe");
    }
}
