//! Boundary translators from store payloads to typed samples.
//!
//! Purely mechanical: parse, tag-check, and enforce per-modality timestamp
//! ordering. Anything malformed becomes [`FusionError::InvalidSample`] and
//! is counted, never propagated past the tick.

use serde_json::Value;

use crate::domain::{
    AlcoholEvent, BioSample, IngressMessage, PilotRecord, StateSnapshot, VisionSample,
};
use crate::store::{keys, DataStore};
use crate::{FusionError, Result};

/// Parse a `data:vision` record.
pub fn vision_from_value(value: &Value) -> Result<VisionSample> {
    serde_json::from_value(value.clone())
        .map_err(|e| FusionError::InvalidSample(format!("vision payload: {e}")))
}

/// Parse a `data:hr` record.
pub fn bio_from_value(value: &Value) -> Result<BioSample> {
    serde_json::from_value(value.clone())
        .map_err(|e| FusionError::InvalidSample(format!("hr payload: {e}")))
}

/// Parse a `data:alcohol_detected` record.
pub fn alcohol_from_value(value: &Value) -> Result<AlcoholEvent> {
    serde_json::from_value(value.clone())
        .map_err(|e| FusionError::InvalidSample(format!("alcohol payload: {e}")))
}

/// Parse a `data:pilot:{id}` record.
pub fn pilot_from_value(value: &Value) -> Result<PilotRecord> {
    serde_json::from_value(value.clone())
        .map_err(|e| FusionError::InvalidSample(format!("pilot payload: {e}")))
}

/// Parse a `state:current` record.
pub fn state_from_value(value: &Value) -> Result<StateSnapshot> {
    serde_json::from_value(value.clone())
        .map_err(|e| FusionError::InvalidSample(format!("state payload: {e}")))
}

/// Resolve a changed key to its typed message, if the key is one the
/// engine understands and the record is still present.
pub fn message_for_key(store: &dyn DataStore, key: &str) -> Result<Option<IngressMessage>> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    let message = match key {
        keys::VISION => IngressMessage::Vision(vision_from_value(&value)?),
        keys::HR => IngressMessage::Bio(bio_from_value(&value)?),
        keys::ALCOHOL => IngressMessage::Alcohol(alcohol_from_value(&value)?),
        keys::STATE_CURRENT => IngressMessage::AlertState(state_from_value(&value)?),
        _ if key.starts_with("data:pilot:") => IngressMessage::Pilot(pilot_from_value(&value)?),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

/// Attach the producing service tag to an outgoing record.
pub fn tag_service(value: Value, service: &str) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert("service".to_string(), Value::String(service.to_string()));
            Value::Object(map)
        }
        other => other,
    }
}

/// Per-modality ordering guard.
///
/// Timestamps must be monotonically non-decreasing; an equal timestamp is
/// the same record read again (the store only keeps the latest), which is
/// fine. A regression means a producer restarted or raced and the sample
/// is dropped.
#[derive(Debug, Default)]
pub struct ModalityGate {
    last_timestamp_s: Option<f64>,
    dropped: u64,
}

impl ModalityGate {
    /// Create a gate with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or drop a sample timestamp.
    pub fn admit(&mut self, timestamp_s: f64) -> bool {
        match self.last_timestamp_s {
            Some(last) if timestamp_s < last => {
                self.dropped += 1;
                false
            }
            _ => {
                self.last_timestamp_s = Some(timestamp_s);
                true
            }
        }
    }

    /// Samples dropped for ordering violations.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget history (pilot change, producer restart).
    pub fn reset(&mut self) {
        self.last_timestamp_s = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_parse() {
        let value = serde_json::json!({
            "avg_ear": 0.28,
            "mar": 0.2,
            "eyes_closed": false,
            "closure_duration_s": 0.3,
            "microsleep_count": 0,
            "blink_rate_per_minute": 17.0,
            "timestamp_s": 5.0,
            "service": "vision_processor"
        });
        let sample = vision_from_value(&value).unwrap();
        assert_eq!(sample.avg_ear, 0.28);
        assert_eq!(sample.blink_rate_per_minute, 17.0);
    }

    #[test]
    fn test_malformed_payload_is_invalid_sample() {
        let value = serde_json::json!({ "avg_ear": "not a number" });
        let err = vision_from_value(&value).unwrap_err();
        assert!(matches!(err, FusionError::InvalidSample(_)));
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let value = serde_json::json!({ "avg_ear": 0.3 });
        assert!(vision_from_value(&value).is_err());
    }

    #[test]
    fn test_bio_parse_minimal() {
        let value = serde_json::json!({ "hr": 72, "timestamp_s": 9.0 });
        let sample = bio_from_value(&value).unwrap();
        assert_eq!(sample.hr, 72);
        assert!(sample.rmssd_ms.is_none());
    }

    #[test]
    fn test_gate_drops_regressions() {
        let mut gate = ModalityGate::new();
        assert!(gate.admit(1.0));
        assert!(gate.admit(1.0)); // same record re-read
        assert!(gate.admit(2.0));
        assert!(!gate.admit(1.5));
        assert_eq!(gate.dropped(), 1);
        assert!(gate.admit(2.0));

        gate.reset();
        assert!(gate.admit(0.5));
    }

    #[test]
    fn test_tag_service() {
        let tagged = tag_service(serde_json::json!({"a": 1}), "fusion_engine");
        assert_eq!(tagged["service"], "fusion_engine");
    }

    #[test]
    fn test_message_for_key_dispatch() {
        use crate::clock::{FreshnessOracle, ManualClock};
        use crate::store::MemoryStore;
        use std::sync::Arc;

        let clock = Arc::new(ManualClock::new());
        let store = MemoryStore::new(300.0, FreshnessOracle::new(clock));

        store
            .put(keys::VISION, serde_json::json!({ "avg_ear": 0.3, "timestamp_s": 1.0 }))
            .unwrap();
        store
            .put(keys::HR, serde_json::json!({ "hr": 70, "timestamp_s": 1.0 }))
            .unwrap();
        store
            .put(
                &keys::pilot("p-1"),
                serde_json::json!({ "id": "p-1", "active": true }),
            )
            .unwrap();

        assert!(matches!(
            message_for_key(&store, keys::VISION).unwrap(),
            Some(IngressMessage::Vision(_))
        ));
        assert!(matches!(
            message_for_key(&store, keys::HR).unwrap(),
            Some(IngressMessage::Bio(_))
        ));
        assert!(matches!(
            message_for_key(&store, &keys::pilot("p-1")).unwrap(),
            Some(IngressMessage::Pilot(_))
        ));
        // Keys the engine does not consume resolve to no message.
        assert!(message_for_key(&store, keys::ENV).unwrap().is_none());
        assert!(message_for_key(&store, keys::FUSION).unwrap().is_none());
    }
}
