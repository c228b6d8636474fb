//! The evaluation loop.
//!
//! One logical thread runs the whole chain per tick: read inputs, extract
//! features, fuse, classify, commit state. It wakes on new vision or
//! biometric data and otherwise ticks at most 10 Hz. Ingress failures are
//! absorbed locally; the engine only escalates to SystemError after a
//! continuous stretch with no valid sample at all.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::classifier::{StageClassifier, StageDecision};
use crate::clock::{Clock, FreshnessOracle};
use crate::domain::{
    AlertId, FatigueAlert, FusionOutput, IngressMessage, PilotProfile, PilotRecord, Sensitivity,
    SystemState,
};
use crate::fusion::FusionCore;
use crate::ingress::{self, ModalityGate};
use crate::state::{StateManager, StateManagerConfig};
use crate::store::{keys, Backoff, DataStore};
use crate::{EngineConfig, FusionError, Result};

/// Service tag stamped on every record this engine publishes.
pub const SERVICE_NAME: &str = "fusion_engine";

/// Drop counters, readable from any thread.
#[derive(Debug, Default)]
pub struct EngineCounters {
    /// Vision samples dropped for exceeding the freshness window.
    pub stale_dropped: AtomicU64,
    /// Records dropped for failing parse or range validation.
    pub invalid_dropped: AtomicU64,
    /// Samples dropped for per-modality timestamp regressions.
    pub out_of_order_dropped: AtomicU64,
    /// Ticks with no modality present.
    pub empty_ticks: AtomicU64,
}

impl EngineCounters {
    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            invalid_dropped: self.invalid_dropped.load(Ordering::Relaxed),
            out_of_order_dropped: self.out_of_order_dropped.load(Ordering::Relaxed),
            empty_ticks: self.empty_ticks.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value copy of [`EngineCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Vision samples dropped as stale.
    pub stale_dropped: u64,
    /// Records dropped as invalid.
    pub invalid_dropped: u64,
    /// Samples dropped as out of order.
    pub out_of_order_dropped: u64,
    /// Ticks with no modality present.
    pub empty_ticks: u64,
}

/// Cooperative stop signal for a running engine.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Request a graceful shutdown; the engine drains its current tick.
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The fatigue fusion engine.
pub struct FusionEngine {
    config: EngineConfig,
    oracle: FreshnessOracle,
    store: Arc<dyn DataStore>,
    state: Arc<StateManager>,
    fusion: FusionCore,
    classifier: StageClassifier,
    vision_gate: ModalityGate,
    bio_gate: ModalityGate,
    active_pilot: Option<PilotProfile>,
    counters: Arc<EngineCounters>,
    stop: Arc<AtomicBool>,
    last_tick_s: f64,
    last_valid_sample_s: f64,
    last_alcohol_seen_s: Option<f64>,
}

impl FusionEngine {
    /// Create an engine over the given store and clock.
    pub fn new(config: EngineConfig, store: Arc<dyn DataStore>, clock: Arc<dyn Clock>) -> Self {
        let oracle = FreshnessOracle::new(clock);
        let now = oracle.now();

        let state = Arc::new(StateManager::new(
            StateManagerConfig {
                history_limit: config.state_history_limit,
                alcohol_override_window_s: config.alcohol_override_window_s,
                subscriber_timeout_s: config.subscriber_timeout_s,
            },
            oracle.clone(),
        ));

        Self {
            fusion: FusionCore::new(config.fusion.clone()),
            classifier: StageClassifier::new(config.classifier.clone(), now),
            vision_gate: ModalityGate::new(),
            bio_gate: ModalityGate::new(),
            active_pilot: None,
            counters: Arc::new(EngineCounters::default()),
            stop: Arc::new(AtomicBool::new(false)),
            last_tick_s: now,
            last_valid_sample_s: now,
            last_alcohol_seen_s: None,
            state,
            store,
            oracle,
            config,
        }
    }

    /// The state authority this engine commits to.
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    /// Drop counters.
    pub fn counters(&self) -> Arc<EngineCounters> {
        Arc::clone(&self.counters)
    }

    /// Handle to request a graceful shutdown.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.stop))
    }

    /// Current stage as decided by the classifier.
    pub fn stage(&self) -> crate::domain::FatigueStage {
        self.classifier.stage()
    }

    /// Get configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run until shutdown is requested.
    ///
    /// Spawns the subscriber dispatcher, establishes the initial Scanning
    /// state, and then loops: wake on a data notification or after the
    /// tick interval, whichever comes first, never ticking faster than the
    /// interval allows. A store outage backs off exponentially while the
    /// state manager keeps serving the last committed snapshot.
    pub async fn run(&mut self) -> Result<()> {
        if let Some(dispatcher) = self.state.take_dispatcher() {
            tokio::spawn(dispatcher.run());
        }

        if self.state.get_current().is_none() {
            let snapshot = self.state.set_state(
                SystemState::Scanning,
                "Initializing",
                SERVICE_NAME,
                None,
                None,
            )?;
            self.publish_state(&snapshot)?;
        }

        let mut notifications = self.store.watch();
        let mut backoff = Backoff::new(
            self.config.store_backoff_initial_s,
            self.config.store_backoff_cap_s,
        );
        let tick_interval = std::time::Duration::from_secs_f64(self.config.min_tick_interval_s);

        tracing::info!(
            tick_interval_s = self.config.min_tick_interval_s,
            "fusion engine started"
        );

        loop {
            if self.stop.load(Ordering::SeqCst) {
                tracing::info!("shutdown requested, draining");
                break;
            }

            tokio::select! {
                notification = notifications.recv() => {
                    match notification {
                        Ok(key) => {
                            if !self.handle_notification(&key) {
                                continue;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "notification backlog dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tokio::time::sleep(tick_interval).await;
                        }
                    }
                }
                _ = tokio::time::sleep(tick_interval) => {}
            }

            // Rate cap: a notification burst must not outrun the tick
            // interval. The pending work is picked up by the next
            // periodic wake.
            if self.oracle.now() - self.last_tick_s < self.config.min_tick_interval_s {
                continue;
            }

            match self.tick() {
                Ok(()) => backoff.reset(),
                Err(FusionError::StoreUnavailable(reason)) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        %reason,
                        delay_s = delay.as_secs_f64(),
                        "store unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Whether a notification for `key` warrants an immediate tick.
    ///
    /// The changed record is resolved to its typed message and dispatched
    /// exhaustively: sensor and alcohol data wake the evaluation, pilot
    /// updates are absorbed in place, and state echoes (the engine's own
    /// writes) are ignored.
    fn handle_notification(&mut self, key: &str) -> bool {
        let message = match ingress::message_for_key(self.store.as_ref(), key) {
            Ok(Some(message)) => message,
            Ok(None) => return false,
            Err(e) => {
                tracing::debug!(error = %e, key, "unreadable record");
                return false;
            }
        };
        match message {
            IngressMessage::Vision(_) | IngressMessage::Bio(_) | IngressMessage::Alcohol(_) => {
                true
            }
            IngressMessage::Pilot(record) => {
                self.apply_pilot(record);
                false
            }
            IngressMessage::AlertState(_) => false,
        }
    }

    /// Execute one evaluation tick: ingest, fuse, classify, commit.
    ///
    /// Public so embedders (and deterministic tests) can drive the engine
    /// on their own schedule instead of [`run`](Self::run).
    pub fn tick(&mut self) -> Result<()> {
        let now = self.oracle.now();
        self.last_tick_s = now;

        self.check_alcohol()?;

        let vision = self.read_vision()?;
        let bio = self.read_bio()?;

        let (baseline_hr, baseline_hrv, sensitivity, pilot_id) = self.pilot_context();

        let output = match self.fusion.fuse(
            vision.as_ref(),
            bio.as_ref(),
            baseline_hr,
            baseline_hrv,
            now,
        ) {
            Ok(output) => {
                self.last_valid_sample_s = now;
                output
            }
            Err(FusionError::InsufficientModalities) => {
                self.counters.empty_ticks.fetch_add(1, Ordering::Relaxed);
                self.check_failure_budget(now)?;
                return Ok(());
            }
            Err(FusionError::InvalidSample(reason)) => {
                self.counters.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%reason, "invalid sample, tick skipped");
                self.check_failure_budget(now)?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.publish_fusion(&output)?;

        let decision = self.classifier.evaluate(&output, sensitivity, now);

        if decision.changed {
            self.publish_alert(&output, &decision, pilot_id.clone(), now)?;
        }
        self.apply_state(&output, &decision, pilot_id)?;

        Ok(())
    }

    /// Pick up an alcohol record and engage the override while it is
    /// fresh. Records already seen or aged out are ignored.
    fn check_alcohol(&mut self) -> Result<()> {
        let Some(value) = self.store.get(keys::ALCOHOL)? else {
            return Ok(());
        };
        let event = match ingress::alcohol_from_value(&value) {
            Ok(event) => event,
            Err(e) => {
                self.counters.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "bad alcohol record");
                return Ok(());
            }
        };

        let is_new = self
            .last_alcohol_seen_s
            .map_or(true, |seen| event.timestamp_s > seen);
        if !is_new {
            return Ok(());
        }
        self.last_alcohol_seen_s = Some(event.timestamp_s);

        if !event.detected
            || !self
                .oracle
                .is_fresh(event.timestamp_s, self.config.alcohol_override_window_s)
        {
            return Ok(());
        }

        match self.state.note_alcohol_detection(&event, SERVICE_NAME) {
            Ok(snapshot) => self.publish_state(&snapshot)?,
            Err(e) => tracing::debug!(error = %e, "alcohol override not applied"),
        }
        Ok(())
    }

    fn publish_state(&self, snapshot: &crate::domain::StateSnapshot) -> Result<()> {
        let value = serde_json::to_value(snapshot)
            .map_err(|e| FusionError::InvalidSample(format!("state serialize: {e}")))?;
        self.store.put(keys::STATE_CURRENT, value)
    }

    fn read_vision(&mut self) -> Result<Option<crate::domain::VisionSample>> {
        let Some(value) = self.store.get(keys::VISION)? else {
            return Ok(None);
        };
        let sample = match ingress::vision_from_value(&value) {
            Ok(sample) => sample,
            Err(e) => {
                self.counters.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "vision record dropped");
                return Ok(None);
            }
        };
        if !self.vision_gate.admit(sample.timestamp_s) {
            self.counters
                .out_of_order_dropped
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                timestamp_s = sample.timestamp_s,
                "out-of-order vision sample dropped"
            );
            return Ok(None);
        }
        if !self
            .oracle
            .is_fresh(sample.timestamp_s, self.config.vision_max_age_s)
        {
            self.counters.stale_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(timestamp_s = sample.timestamp_s, "stale vision sample");
            return Ok(None);
        }
        Ok(Some(sample))
    }

    fn read_bio(&mut self) -> Result<Option<crate::domain::BioSample>> {
        let Some(value) = self.store.get(keys::HR)? else {
            return Ok(None);
        };
        let sample = match ingress::bio_from_value(&value) {
            Ok(sample) => sample,
            Err(e) => {
                self.counters.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "hr record dropped");
                return Ok(None);
            }
        };
        if !self.bio_gate.admit(sample.timestamp_s) {
            self.counters
                .out_of_order_dropped
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                timestamp_s = sample.timestamp_s,
                "out-of-order hr sample dropped"
            );
            return Ok(None);
        }
        Ok(Some(sample))
    }

    fn apply_pilot(&mut self, record: PilotRecord) {
        if record.active {
            tracing::info!(pilot_id = %record.profile.id, "active pilot updated");
            self.active_pilot = Some(record.profile);
        } else if self
            .active_pilot
            .as_ref()
            .is_some_and(|p| p.id == record.profile.id)
        {
            tracing::info!(pilot_id = %record.profile.id, "active pilot cleared");
            self.active_pilot = None;
        }
    }

    fn pilot_context(&self) -> (f64, f64, Sensitivity, Option<String>) {
        match &self.active_pilot {
            Some(profile) => (
                profile.baseline_hr,
                profile.baseline_hrv,
                profile.effective_sensitivity(),
                Some(profile.id.clone()),
            ),
            None => (
                crate::domain::pilot::DEFAULT_BASELINE_HR,
                crate::domain::pilot::DEFAULT_BASELINE_HRV,
                Sensitivity::Medium,
                None,
            ),
        }
    }

    fn publish_fusion(&self, output: &FusionOutput) -> Result<()> {
        let value = serde_json::to_value(output)
            .map_err(|e| FusionError::InvalidSample(format!("fusion serialize: {e}")))?;
        self.store
            .put(keys::FUSION, ingress::tag_service(value, SERVICE_NAME))
    }

    fn publish_alert(
        &self,
        output: &FusionOutput,
        decision: &StageDecision,
        pilot_id: Option<String>,
        now: f64,
    ) -> Result<()> {
        let alert = FatigueAlert {
            id: AlertId::new(),
            stage: decision.stage,
            fusion_score: decision.window_avg,
            threshold_used: decision.threshold_used,
            pilot_id,
            avg_ear: output.vision.as_ref().map_or(0.0, |v| v.avg_ear),
            closure_duration_s: output.vision.as_ref().map_or(0.0, |v| v.closure_duration_s),
            microsleep_count: output.vision.as_ref().map_or(0, |v| v.microsleep_count),
            blink_rate_per_minute: output
                .vision
                .as_ref()
                .map_or(0.0, |v| v.blink_rate_per_minute),
            timestamp_s: now,
        };

        tracing::info!(
            stage = %alert.stage,
            score = alert.fusion_score.value(),
            via_critical = decision.via_critical,
            "fatigue alert"
        );

        let value = serde_json::to_value(&alert)
            .map_err(|e| FusionError::InvalidSample(format!("alert serialize: {e}")))?;
        self.store
            .put(keys::FATIGUE_ALERT, ingress::tag_service(value, SERVICE_NAME))
    }

    /// Commit the stage decision to the state manager.
    ///
    /// The classifier is silent until monitoring is established: from
    /// Scanning or SystemError the engine first enters MonitoringActive,
    /// and alert states follow on later ticks. Override and terminal
    /// states swallow fatigue commits entirely.
    fn apply_state(
        &mut self,
        output: &FusionOutput,
        decision: &StageDecision,
        pilot_id: Option<String>,
    ) -> Result<()> {
        let message = self.display_message(output, decision);
        let mut data = serde_json::Map::new();
        data.insert(
            "fusion_score".into(),
            serde_json::json!(output.fusion_score.value()),
        );
        data.insert(
            "confidence".into(),
            serde_json::json!(output.confidence.value()),
        );
        if let Some(ref v) = output.vision {
            data.insert("ear".into(), serde_json::json!(v.avg_ear));
            data.insert(
                "blink_rate".into(),
                serde_json::json!(v.blink_rate_per_minute),
            );
        }
        if let Some(ref b) = output.bio {
            data.insert("hr".into(), serde_json::json!(b.hr));
        }

        let target = match self.state.get_current().map(|s| s.state) {
            None => SystemState::Scanning,
            Some(SystemState::Scanning) | Some(SystemState::SystemError) => {
                SystemState::MonitoringActive
            }
            Some(SystemState::IntruderDetected) | Some(SystemState::SystemCrashed) => {
                return Ok(());
            }
            Some(_) => SystemState::from_stage(decision.stage),
        };

        match self
            .state
            .set_state(target, message, SERVICE_NAME, pilot_id, Some(data))
        {
            Ok(snapshot) => self.publish_state(&snapshot)?,
            Err(FusionError::IllegalTransition { from, to }) => {
                // Override in force or a race with another service; the
                // committed state stands.
                tracing::debug!(from, to, "stage commit rejected");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Two-line status display: stage phrase, then readings
    /// (EAR, blink rate, temperature, humidity).
    fn display_message(&self, output: &FusionOutput, decision: &StageDecision) -> String {
        let stage_line = match decision.stage {
            crate::domain::FatigueStage::Active => "I'm watching",
            crate::domain::FatigueStage::Mild => "Mild",
            crate::domain::FatigueStage::Moderate => "Moderate",
            crate::domain::FatigueStage::Severe => "Severe",
        };

        let ear = output
            .vision
            .as_ref()
            .map(|v| {
                let formatted = format!("{:.2}", v.avg_ear);
                formatted.trim_start_matches('0').to_string()
            })
            .unwrap_or_else(|| "N/A".to_string());
        let blink = output
            .vision
            .as_ref()
            .map(|v| format!("{}", v.blink_rate_per_minute as i64))
            .unwrap_or_else(|| "N/A".to_string());

        let (temp, humidity) = self.env_readings();

        format!("{stage_line}\n{ear} {blink} {temp} {humidity}")
    }

    /// Ambient readings for display enrichment; never fused.
    fn env_readings(&self) -> (String, String) {
        let fallback = ("N/A".to_string(), "N/A".to_string());
        let Ok(Some(value)) = self.store.get(keys::ENV) else {
            return fallback;
        };
        let read = |field: &str| {
            value
                .get(field)
                .and_then(|v| v.as_f64())
                .map(|n| format!("{}", n as i64))
                .unwrap_or_else(|| "N/A".to_string())
        };
        (read("temp"), read("humidity"))
    }

    /// After a continuous stretch with no valid sample, declare the error
    /// state. Recovery happens naturally on the next valid tick.
    fn check_failure_budget(&mut self, now: f64) -> Result<()> {
        if now - self.last_valid_sample_s <= self.config.failure_budget_s {
            return Ok(());
        }
        let current = self.state.get_current().map(|s| s.state);
        if matches!(
            current,
            Some(SystemState::SystemError) | Some(SystemState::SystemCrashed) | None
        ) {
            return Ok(());
        }

        tracing::error!(
            since_s = now - self.last_valid_sample_s,
            budget_s = self.config.failure_budget_s,
            "no valid samples within failure budget"
        );
        match self.state.set_state(
            SystemState::SystemError,
            "No valid sensor data",
            SERVICE_NAME,
            None,
            None,
        ) {
            Ok(snapshot) => self.publish_state(&snapshot)?,
            Err(FusionError::IllegalTransition { from, to }) => {
                tracing::debug!(from, to, "error-state commit rejected");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn engine_fixture() -> (FusionEngine, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let oracle = FreshnessOracle::new(clock.clone());
        let store = Arc::new(MemoryStore::new(300.0, oracle));
        let engine = FusionEngine::new(
            EngineConfig::default(),
            store.clone() as Arc<dyn DataStore>,
            clock.clone(),
        );
        (engine, clock, store)
    }

    fn publish_vision(store: &MemoryStore, avg_ear: f64, timestamp_s: f64) {
        store
            .put(
                keys::VISION,
                serde_json::json!({
                    "avg_ear": avg_ear,
                    "mar": 0.2,
                    "eyes_closed": false,
                    "closure_duration_s": 0.0,
                    "microsleep_count": 0,
                    "blink_rate_per_minute": 15.0,
                    "yawning": false,
                    "yawn_count": 0,
                    "yawn_duration_s": 0.0,
                    "timestamp_s": timestamp_s,
                    "service": "vision_processor"
                }),
            )
            .unwrap();
    }

    #[test]
    fn test_tick_without_data_is_a_noop() {
        let (mut engine, _clock, _store) = engine_fixture();
        engine.tick().unwrap();
        assert_eq!(engine.counters().snapshot().empty_ticks, 1);
        assert!(engine.state_manager().get_current().is_none());
    }

    #[test]
    fn test_tick_publishes_fusion_output() {
        let (mut engine, clock, store) = engine_fixture();
        publish_vision(&store, 0.28, 0.0);
        clock.advance(1.0);
        engine.tick().unwrap();

        let fusion = store.get(keys::FUSION).unwrap().unwrap();
        assert_eq!(fusion["service"], SERVICE_NAME);
        assert!(fusion["fusion_score"].as_f64().unwrap() >= 0.0);
        assert_eq!(fusion["is_critical_event"], false);
    }

    #[test]
    fn test_stale_vision_is_dropped() {
        let (mut engine, clock, store) = engine_fixture();
        publish_vision(&store, 0.28, 0.0);
        clock.advance(6.0); // past the 5s vision freshness window
        engine.tick().unwrap();

        let counters = engine.counters().snapshot();
        assert_eq!(counters.stale_dropped, 1);
        assert_eq!(counters.empty_ticks, 1);
        assert!(store.get(keys::FUSION).unwrap().is_none());
    }

    #[test]
    fn test_out_of_order_vision_is_dropped() {
        let (mut engine, clock, store) = engine_fixture();
        publish_vision(&store, 0.28, 2.0);
        clock.advance(2.1);
        engine.tick().unwrap();

        publish_vision(&store, 0.28, 1.0); // regression
        clock.advance(0.2);
        engine.tick().unwrap();

        assert_eq!(engine.counters().snapshot().out_of_order_dropped, 1);
    }

    #[test]
    fn test_invalid_vision_is_counted() {
        let (mut engine, clock, store) = engine_fixture();
        store
            .put(keys::VISION, serde_json::json!({"avg_ear": "zero"}))
            .unwrap();
        clock.advance(0.5);
        engine.tick().unwrap();
        assert_eq!(engine.counters().snapshot().invalid_dropped, 1);
    }

    #[test]
    fn test_failure_budget_reaches_system_error() {
        let (mut engine, clock, store) = engine_fixture();
        // Establish monitoring first.
        publish_vision(&store, 0.30, 0.0);
        clock.advance(0.5);
        engine.tick().unwrap(); // None -> Scanning target
        engine.tick().unwrap(); // Scanning -> MonitoringActive
        assert_eq!(
            engine.state_manager().get_current().unwrap().state,
            SystemState::MonitoringActive
        );

        // Vision goes stale and stays gone past the budget.
        clock.advance(31.0);
        engine.tick().unwrap();
        assert_eq!(
            engine.state_manager().get_current().unwrap().state,
            SystemState::SystemError
        );

        // Fresh data recovers through MonitoringActive.
        publish_vision(&store, 0.30, clock.now());
        clock.advance(0.2);
        engine.tick().unwrap();
        assert_eq!(
            engine.state_manager().get_current().unwrap().state,
            SystemState::MonitoringActive
        );
    }

    #[test]
    fn test_alcohol_record_forces_override() {
        let (mut engine, clock, store) = engine_fixture();
        publish_vision(&store, 0.30, 0.0);
        clock.advance(0.5);
        engine.tick().unwrap();
        engine.tick().unwrap();

        store
            .put(
                keys::ALCOHOL,
                serde_json::json!({
                    "detected": true,
                    "detection_time": "2026-08-02 10:15:00",
                    "timestamp_s": clock.now()
                }),
            )
            .unwrap();
        clock.advance(0.2);
        engine.tick().unwrap();
        assert_eq!(
            engine.state_manager().get_current().unwrap().state,
            SystemState::AlcoholDetected
        );
        assert!(engine.state_manager().alcohol_override_active());
    }

    #[test]
    fn test_aged_alcohol_record_is_ignored() {
        let (mut engine, clock, store) = engine_fixture();
        clock.set(100.0);
        store
            .put(
                keys::ALCOHOL,
                serde_json::json!({
                    "detected": true,
                    "detection_time": "",
                    "timestamp_s": 85.0
                }),
            )
            .unwrap();
        publish_vision(&store, 0.30, 100.0);
        clock.advance(0.2);
        engine.tick().unwrap();

        // 15s-old record: no override.
        assert!(!engine.state_manager().alcohol_override_active());
        assert_ne!(
            engine.state_manager().get_current().unwrap().state,
            SystemState::AlcoholDetected
        );
    }

    #[test]
    fn test_pilot_profile_feeds_sensitivity() {
        let (mut engine, _clock, store) = engine_fixture();
        let key = keys::pilot("p-001");
        store
            .put(
                &key,
                serde_json::json!({
                    "id": "p-001",
                    "baseline_hr": 60.0,
                    "baseline_hrv": 50.0,
                    "sensitivity": "high",
                    "active": true
                }),
            )
            .unwrap();
        // A pilot update is absorbed without waking the evaluation.
        assert!(!engine.handle_notification(&key));

        let (hr, hrv, sensitivity, pilot_id) = engine.pilot_context();
        assert_eq!(hr, 60.0);
        assert_eq!(hrv, 50.0);
        assert_eq!(sensitivity, Sensitivity::High);
        assert_eq!(pilot_id.as_deref(), Some("p-001"));

        // Deactivation clears the context.
        store
            .put(
                &key,
                serde_json::json!({
                    "id": "p-001",
                    "baseline_hr": 60.0,
                    "baseline_hrv": 50.0,
                    "active": false
                }),
            )
            .unwrap();
        assert!(!engine.handle_notification(&key));
        assert!(engine.pilot_context().3.is_none());
    }

    #[test]
    fn test_sensor_notifications_wake_the_evaluation() {
        let (mut engine, _clock, store) = engine_fixture();
        publish_vision(&store, 0.30, 0.0);
        assert!(engine.handle_notification(keys::VISION));
        // Display-only and self-published records never wake it.
        store
            .put(keys::ENV, serde_json::json!({"temp": 21.0}))
            .unwrap();
        assert!(!engine.handle_notification(keys::ENV));
    }

    #[tokio::test]
    async fn test_run_drains_on_shutdown() {
        let (mut engine, _clock, store) = engine_fixture();
        // Real clock not needed: the loop wakes on store notifications
        // and the manual clock keeps every sample fresh.
        let shutdown = engine.shutdown_handle();
        publish_vision(&store, 0.30, 0.0);

        let task = tokio::spawn(async move {
            let result = engine.run().await;
            (engine, result)
        });

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        shutdown.shutdown();
        let (engine, result) = task.await.unwrap();
        assert!(result.is_ok());
        // The loop ran at least one tick before draining.
        assert!(engine.state_manager().get_current().is_some());
    }
}
