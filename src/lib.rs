//! # CogniFlight Fusion
//!
//! Real-time multi-modal fatigue fusion engine for pilot monitoring.
//!
//! The engine ingests vision metrics (eye/mouth geometry, microsleeps,
//! yawning, blink rate) and biometric metrics (heart rate, HRV, stress
//! index, HR trend), combines them with confidence-weighted fusion,
//! applies dual-path temporal smoothing, and drives a hysteretic
//! four-stage fatigue state machine under hard latency and rate-limit
//! guarantees. It also owns the system-wide state authority: a
//! thread-safe state manager with a validated transition graph and
//! override semantics for alcohol detection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     cogniflight-fusion                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ingress ──► extractors ──► fusion ──► classifier ──► state │
//! │     ▲                                                  │    │
//! │     │                 store (keyed hash,               │    │
//! │     └──────────────── change notifications) ◄──────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sensor acquisition, face authentication, hardware alert rendering, and
//! telemetry upload are external producers/consumers bound only by the
//! record contracts in [`store::keys`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cogniflight_fusion::{
//!     EngineConfig, FusionEngine, MemoryStore, MonotonicClock,
//! };
//! use cogniflight_fusion::clock::FreshnessOracle;
//!
//! #[tokio::main]
//! async fn main() -> cogniflight_fusion::Result<()> {
//!     let config = EngineConfig::builder()
//!         .state_history_limit(500)
//!         .failure_budget_s(15.0)
//!         .build();
//!
//!     let clock = Arc::new(MonotonicClock::new());
//!     let oracle = FreshnessOracle::new(clock.clone());
//!     let store = Arc::new(MemoryStore::new(config.record_ttl_s, oracle));
//!
//!     let mut engine = FusionEngine::new(config, store, clock);
//!     let shutdown = engine.shutdown_handle();
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         shutdown.shutdown();
//!     });
//!
//!     engine.run().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod classifier;
pub mod clock;
pub mod domain;
pub mod engine;
pub mod extractors;
pub mod fusion;
pub mod ingress;
pub mod state;
pub mod store;

// Re-export main types
pub use classifier::{ClassifierConfig, StageClassifier, StageDecision};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use domain::{
    AlcoholEvent, AlertId, BioSample, FatigueAlert, FatigueStage, FusionOutput, IngressMessage,
    PilotProfile, PilotRecord, Score, Sensitivity, StateSnapshot, SystemState, VisionSample,
};
pub use engine::{CounterSnapshot, EngineCounters, FusionEngine, ShutdownHandle, SERVICE_NAME};
pub use fusion::{FusionConfig, FusionCore};
pub use state::{StateDispatcher, StateManager, StateManagerConfig, StateSubscriber};
pub use store::{Backoff, DataStore, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common result type for fusion engine operations
pub type Result<T> = std::result::Result<T, FusionError>;

/// Unified error type for fusion engine operations
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// Sample older than its freshness window
    #[error("stale sample: age {age_s:.2}s exceeds max {max_age_s:.2}s")]
    StaleSample {
        /// Observed age of the sample, seconds.
        age_s: f64,
        /// Freshness window it exceeded, seconds.
        max_age_s: f64,
    },

    /// Sample failed parse or range validation
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    /// No modality present; nothing to fuse
    #[error("no modality present for fusion")]
    InsufficientModalities,

    /// Transition absent from the state graph and not a legal override
    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition {
        /// State the transition was attempted from.
        from: &'static str,
        /// State the transition targeted.
        to: &'static str,
    },

    /// A state-change subscriber failed or timed out
    #[error("subscriber '{subscriber}' failed: {reason}")]
    SubscriberFailure {
        /// Subscriber name.
        subscriber: String,
        /// Failure description.
        reason: String,
    },

    /// The keyed hash store is unreachable
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Graceful shutdown was requested
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Configuration for the fusion engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-record expiration for volatile store records, seconds.
    pub record_ttl_s: f64,
    /// State history ring capacity.
    pub state_history_limit: usize,
    /// Fusion core tuning.
    pub fusion: FusionConfig,
    /// Stage classifier tuning.
    pub classifier: ClassifierConfig,
    /// Freshness window for vision samples, seconds.
    pub vision_max_age_s: f64,
    /// Seconds an alcohol detection keeps the override in force.
    pub alcohol_override_window_s: f64,
    /// Minimum seconds between evaluation ticks (0.1 = 10 Hz cap).
    pub min_tick_interval_s: f64,
    /// Continuous seconds without a valid sample before SystemError.
    pub failure_budget_s: f64,
    /// Per-subscriber callback timeout, seconds.
    pub subscriber_timeout_s: f64,
    /// Initial store-reconnect backoff, seconds.
    pub store_backoff_initial_s: f64,
    /// Store-reconnect backoff cap, seconds.
    pub store_backoff_cap_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            record_ttl_s: 300.0,
            state_history_limit: 1000,
            fusion: FusionConfig::default(),
            classifier: ClassifierConfig::default(),
            vision_max_age_s: 5.0,
            alcohol_override_window_s: 10.0,
            min_tick_interval_s: 0.1,
            failure_budget_s: 30.0,
            subscriber_timeout_s: 2.0,
            store_backoff_initial_s: 0.5,
            store_backoff_cap_s: 30.0,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the per-record store TTL.
    pub fn record_ttl_s(mut self, ttl_s: f64) -> Self {
        self.config.record_ttl_s = ttl_s.max(1.0);
        self
    }

    /// Set the state history capacity.
    pub fn state_history_limit(mut self, limit: usize) -> Self {
        self.config.state_history_limit = limit.max(1);
        self
    }

    /// Set the three stage thresholds.
    pub fn thresholds(mut self, mild: f64, moderate: f64, severe: f64) -> Self {
        self.config.classifier.mild_threshold = mild.clamp(0.0, 1.0);
        self.config.classifier.moderate_threshold = moderate.clamp(0.0, 1.0);
        self.config.classifier.severe_threshold = severe.clamp(0.0, 1.0);
        self
    }

    /// Set the hysteresis band.
    pub fn hysteresis(mut self, band: f64) -> Self {
        self.config.classifier.hysteresis = band.clamp(0.0, 1.0);
        self
    }

    /// Set the minimum seconds between normal-path stage changes.
    pub fn min_stage_duration_s(mut self, secs: f64) -> Self {
        self.config.classifier.min_stage_duration_s = secs.max(0.0);
        self
    }

    /// Set the minimum seconds between critical escalations.
    pub fn max_critical_alert_rate_s(mut self, secs: f64) -> Self {
        self.config.classifier.max_critical_alert_rate_s = secs.max(0.0);
        self
    }

    /// Set the fusion smoothing window size.
    pub fn window_size(mut self, size: usize) -> Self {
        self.config.fusion.window_size = size.max(1);
        self
    }

    /// Set the trend buffer size.
    pub fn trend_window_size(mut self, size: usize) -> Self {
        self.config.fusion.trend_window_size = size.max(2);
        self
    }

    /// Set the EMA weights, most-recent first. Resizes the window to
    /// match.
    pub fn ema_weights(mut self, weights: Vec<f64>) -> Self {
        if !weights.is_empty() {
            self.config.fusion.window_size = weights.len();
            self.config.fusion.ema_weights = weights;
        }
        self
    }

    /// Set the vision freshness window.
    pub fn vision_max_age_s(mut self, secs: f64) -> Self {
        self.config.vision_max_age_s = secs.max(0.0);
        self
    }

    /// Set the alcohol override window.
    pub fn alcohol_override_window_s(mut self, secs: f64) -> Self {
        self.config.alcohol_override_window_s = secs.max(0.0);
        self
    }

    /// Set the minimum tick interval.
    pub fn min_tick_interval_s(mut self, secs: f64) -> Self {
        self.config.min_tick_interval_s = secs.max(0.001);
        self
    }

    /// Set the continuous failure budget.
    pub fn failure_budget_s(mut self, secs: f64) -> Self {
        self.config.failure_budget_s = secs.max(0.0);
        self
    }

    /// Set the per-subscriber callback timeout.
    pub fn subscriber_timeout_s(mut self, secs: f64) -> Self {
        self.config.subscriber_timeout_s = secs.max(0.0);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        AlcoholEvent, AlertId, BioSample, DataStore, EngineConfig, EngineConfigBuilder,
        FatigueAlert, FatigueStage, FusionEngine, FusionError, FusionOutput, MemoryStore,
        PilotProfile, Result, Score, Sensitivity, ShutdownHandle, StateManager, StateSnapshot,
        StateSubscriber, SystemState, VisionSample,
    };
}
