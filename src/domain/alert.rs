//! Fatigue alert record published on stage changes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FatigueStage, Score};

/// Unique identifier for a fatigue alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Create a new random alert ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload written to `data:fatigue_alert` when the stage changes.
///
/// Carries the vision diagnostics alongside the decision so downstream
/// alerting can render context without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueAlert {
    /// Alert identifier.
    pub id: AlertId,
    /// Stage entered.
    pub stage: FatigueStage,
    /// Windowed score that crossed the threshold.
    pub fusion_score: Score,
    /// Effective threshold for the stage entered.
    pub threshold_used: f64,
    /// Pilot in context, if any.
    pub pilot_id: Option<String>,
    /// Average eye aspect ratio at alert time.
    pub avg_ear: f64,
    /// Current eye-closure duration at alert time, seconds.
    pub closure_duration_s: f64,
    /// Microsleep count at alert time.
    pub microsleep_count: u32,
    /// Blink rate at alert time, per minute.
    pub blink_rate_per_minute: f64,
    /// Alert time on the monotonic timeline, seconds.
    pub timestamp_s: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_ids_are_unique() {
        assert_ne!(AlertId::new(), AlertId::new());
    }

    #[test]
    fn test_alert_roundtrip() {
        let alert = FatigueAlert {
            id: AlertId::new(),
            stage: FatigueStage::Moderate,
            fusion_score: Score::new(0.61),
            threshold_used: 0.55,
            pilot_id: Some("p-001".into()),
            avg_ear: 0.14,
            closure_duration_s: 1.2,
            microsleep_count: 2,
            blink_rate_per_minute: 4.0,
            timestamp_s: 42.0,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["stage"], "moderate");
        let back: FatigueAlert = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, alert.id);
    }
}
