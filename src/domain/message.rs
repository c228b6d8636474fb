//! Typed messages crossing the ingress boundary.

use serde::{Deserialize, Serialize};

use super::{BioSample, PilotProfile, StateSnapshot, VisionSample};

/// Alcohol detection event from the bio monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlcoholEvent {
    /// Whether alcohol was detected (producers only publish positives).
    #[serde(default = "default_true")]
    pub detected: bool,
    /// Human-readable detection time, as published by the sensor service.
    #[serde(default)]
    pub detection_time: String,
    /// Detection time on the monotonic timeline, seconds.
    pub timestamp_s: f64,
}

fn default_true() -> bool {
    true
}

/// Pilot profile record as stored under `data:pilot:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotRecord {
    /// The profile itself.
    #[serde(flatten)]
    pub profile: PilotProfile,
    /// Whether this pilot is the one currently in the seat.
    #[serde(default)]
    pub active: bool,
}

/// Everything the evaluation thread can receive, as one tagged sum.
///
/// Exhaustive matching here is what keeps the dispatch table honest when a
/// new modality is added.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngressMessage {
    /// Fresh vision metrics.
    Vision(VisionSample),
    /// Fresh biometric metrics.
    Bio(BioSample),
    /// Alcohol detection event.
    Alcohol(AlcoholEvent),
    /// Pilot profile update.
    Pilot(PilotRecord),
    /// Committed system state, as seen by downstream consumers.
    AlertState(StateSnapshot),
}

impl IngressMessage {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            IngressMessage::Vision(_) => "vision",
            IngressMessage::Bio(_) => "bio",
            IngressMessage::Alcohol(_) => "alcohol",
            IngressMessage::Pilot(_) => "pilot",
            IngressMessage::AlertState(_) => "alert_state",
        }
    }
}
