//! System-wide operational states, the validated transition graph, and
//! immutable state snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FatigueStage;

/// Operational states of the monitoring system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// Looking for a pilot or (re)connecting sensors.
    Scanning,
    /// Unauthorized person in the cockpit seat.
    IntruderDetected,
    /// Pilot authenticated and monitored, no fatigue detected.
    MonitoringActive,
    /// Early fatigue warning.
    AlertMild,
    /// Escalated fatigue warning.
    AlertModerate,
    /// Critical fatigue alert.
    AlertSevere,
    /// Alcohol override in effect.
    AlcoholDetected,
    /// Service error or malfunction.
    SystemError,
    /// Watchdog-declared unrecoverable failure.
    SystemCrashed,
}

impl SystemState {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Scanning => "scanning",
            SystemState::IntruderDetected => "intruder_detected",
            SystemState::MonitoringActive => "monitoring_active",
            SystemState::AlertMild => "alert_mild",
            SystemState::AlertModerate => "alert_moderate",
            SystemState::AlertSevere => "alert_severe",
            SystemState::AlcoholDetected => "alcohol_detected",
            SystemState::SystemError => "system_error",
            SystemState::SystemCrashed => "system_crashed",
        }
    }

    /// True for the monitoring/alert states driven by the stage classifier.
    pub fn is_fatigue_state(&self) -> bool {
        matches!(
            self,
            SystemState::MonitoringActive
                | SystemState::AlertMild
                | SystemState::AlertModerate
                | SystemState::AlertSevere
        )
    }

    /// System state corresponding to a fatigue stage.
    pub fn from_stage(stage: FatigueStage) -> Self {
        match stage {
            FatigueStage::Active => SystemState::MonitoringActive,
            FatigueStage::Mild => SystemState::AlertMild,
            FatigueStage::Moderate => SystemState::AlertModerate,
            FatigueStage::Severe => SystemState::AlertSevere,
        }
    }

    /// Whether the `self -> to` edge is in the transition graph.
    ///
    /// Self-edges are admissible everywhere they appear in the graph and
    /// are used for message updates without a level change. Alcohol
    /// override entry and exit are handled above this check by the state
    /// manager; this is the plain graph.
    pub fn can_transition_to(&self, to: SystemState) -> bool {
        use SystemState::*;
        match self {
            Scanning | IntruderDetected => !matches!(to, AlertMild | AlertModerate | AlertSevere),
            MonitoringActive => true,
            AlertMild | AlertModerate | AlertSevere => !matches!(to, IntruderDetected),
            AlcoholDetected => matches!(to, AlcoholDetected | SystemError | SystemCrashed),
            SystemError => matches!(
                to,
                Scanning | MonitoringActive | AlcoholDetected | SystemError | SystemCrashed
            ),
            SystemCrashed => matches!(to, SystemCrashed),
        }
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one committed system state.
///
/// Readers always receive a complete copy; the monotonic `timestamp_s`
/// drives temporal logic while `recorded_at` exists for telemetry only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Committed state.
    pub state: SystemState,
    /// Human-readable status line.
    pub message: String,
    /// Commit time on the monotonic timeline, seconds.
    pub timestamp_s: f64,
    /// Wall-clock commit time.
    pub recorded_at: DateTime<Utc>,
    /// Pilot in context, if any.
    pub pilot_id: Option<String>,
    /// Service that requested the transition.
    pub service: String,
    /// Opaque payload attached by the caller.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl StateSnapshot {
    /// Build a snapshot committed at `timestamp_s`.
    pub fn new(
        state: SystemState,
        message: impl Into<String>,
        service: impl Into<String>,
        timestamp_s: f64,
        pilot_id: Option<String>,
        data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self {
            state,
            message: message.into(),
            timestamp_s,
            recorded_at: Utc::now(),
            pilot_id,
            service: service.into(),
            data: data.unwrap_or_default(),
        }
    }
}
