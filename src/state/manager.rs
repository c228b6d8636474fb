//! Thread-safe state manager.
//!
//! One mutex guards the current snapshot, the bounded history, and the
//! alcohol-override bookkeeping. Readers get value copies; a reader never
//! observes a half-applied transition. Subscribers are notified on a
//! dedicated dispatcher task, after commit, outside the mutex, in commit
//! order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::clock::FreshnessOracle;
use crate::domain::{AlcoholEvent, StateSnapshot, SystemState};
use crate::{FusionError, Result};

/// Tuning for the state manager.
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// History ring capacity; oldest snapshots are evicted on overflow.
    pub history_limit: usize,
    /// Seconds an alcohol detection keeps the override in force.
    pub alcohol_override_window_s: f64,
    /// Per-subscriber callback timeout, seconds.
    pub subscriber_timeout_s: f64,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            alcohol_override_window_s: 10.0,
            subscriber_timeout_s: 2.0,
        }
    }
}

/// Receives committed snapshots after each state change.
///
/// Callbacks run on the dispatcher task and must not call back into
/// [`StateManager::set_state`]; route follow-up transitions through a
/// channel instead.
#[async_trait::async_trait]
pub trait StateSubscriber: Send + Sync {
    /// Subscriber name, used in failure logs.
    fn name(&self) -> &str;

    /// Handle a committed state change.
    async fn on_state_change(&self, snapshot: &StateSnapshot) -> Result<()>;
}

struct Inner {
    current: Option<StateSnapshot>,
    history: VecDeque<StateSnapshot>,
    last_alcohol_s: Option<f64>,
}

/// Process-wide state authority.
pub struct StateManager {
    config: StateManagerConfig,
    oracle: FreshnessOracle,
    inner: Mutex<Inner>,
    subscribers: Arc<RwLock<Vec<Arc<dyn StateSubscriber>>>>,
    commit_tx: mpsc::UnboundedSender<StateSnapshot>,
    dispatcher_rx: Mutex<Option<mpsc::UnboundedReceiver<StateSnapshot>>>,
}

impl StateManager {
    /// Create a state manager over the given clock oracle.
    pub fn new(config: StateManagerConfig, oracle: FreshnessOracle) -> Self {
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                current: None,
                history: VecDeque::with_capacity(config.history_limit),
                last_alcohol_s: None,
            }),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            commit_tx,
            dispatcher_rx: Mutex::new(Some(commit_rx)),
            config,
            oracle,
        }
    }

    /// Consistent copy of the current snapshot, if any state was ever set.
    pub fn get_current(&self) -> Option<StateSnapshot> {
        self.inner.lock().current.clone()
    }

    /// Most recent snapshots, newest first, at most `limit`.
    pub fn history(&self, limit: usize) -> Vec<StateSnapshot> {
        let inner = self.inner.lock();
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    /// Number of snapshots currently retained.
    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Register a subscriber for committed state changes.
    pub fn subscribe(&self, subscriber: Arc<dyn StateSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Whether the alcohol override currently suppresses fatigue states.
    pub fn alcohol_override_active(&self) -> bool {
        let inner = self.inner.lock();
        self.override_active(&inner)
    }

    /// Record an alcohol detection and force the override state.
    ///
    /// This is the one entry point that bypasses the transition graph: an
    /// alcohol detection outranks whatever the system was doing, except a
    /// declared crash.
    pub fn note_alcohol_detection(
        &self,
        event: &AlcoholEvent,
        service: &str,
    ) -> Result<StateSnapshot> {
        let mut inner = self.inner.lock();

        if let Some(ref current) = inner.current {
            if current.state == SystemState::SystemCrashed {
                return Err(FusionError::IllegalTransition {
                    from: current.state.as_str(),
                    to: SystemState::AlcoholDetected.as_str(),
                });
            }
        }

        inner.last_alcohol_s = Some(event.timestamp_s);
        let message = if event.detection_time.is_empty() {
            "Alcohol detected".to_string()
        } else {
            format!("Alcohol detected at {}", event.detection_time)
        };
        let snapshot = self.commit(&mut inner, SystemState::AlcoholDetected, message, service, None, None);
        tracing::warn!(timestamp_s = event.timestamp_s, "alcohol override engaged");
        Ok(snapshot)
    }

    /// Transition to `state` with validation.
    ///
    /// Rejected transitions return [`FusionError::IllegalTransition`] and
    /// leave every observable unchanged. Setting the current state with an
    /// identical message is a no-op and does not grow the history.
    pub fn set_state(
        &self,
        state: SystemState,
        message: impl Into<String>,
        service: &str,
        pilot_id: Option<String>,
        data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<StateSnapshot> {
        let message = message.into();
        let mut inner = self.inner.lock();

        let override_active = self.override_active(&inner);
        if override_active && state.is_fatigue_state() {
            let from = inner
                .current
                .as_ref()
                .map_or(SystemState::AlcoholDetected, |s| s.state);
            return Err(FusionError::IllegalTransition {
                from: from.as_str(),
                to: state.as_str(),
            });
        }

        if let Some(ref current) = inner.current {
            if current.state == state && current.message == message {
                return Ok(current.clone());
            }

            let graph_ok = if current.state == SystemState::AlcoholDetected
                && !override_active
                && inner.last_alcohol_s.is_some()
            {
                // The recorded detection has aged out: leaving the alcohol
                // state toward any target except a fresh intruder report
                // is the legal override-clear transition.
                state != SystemState::IntruderDetected
            } else {
                current.state.can_transition_to(state)
            };

            if !graph_ok {
                return Err(FusionError::IllegalTransition {
                    from: current.state.as_str(),
                    to: state.as_str(),
                });
            }
        }

        Ok(self.commit(&mut inner, state, message, service, pilot_id, data))
    }

    /// Commit a snapshot under the lock and hand it to the dispatcher.
    fn commit(
        &self,
        inner: &mut Inner,
        state: SystemState,
        message: String,
        service: &str,
        pilot_id: Option<String>,
        data: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> StateSnapshot {
        let snapshot =
            StateSnapshot::new(state, message, service, self.oracle.now(), pilot_id, data);

        if inner.history.len() >= self.config.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(snapshot.clone());
        inner.current = Some(snapshot.clone());

        tracing::info!(state = %snapshot.state, service, "state committed");

        // Dispatcher may not be running (e.g. pure unit tests); the send
        // failing only means nobody is listening.
        let _ = self.commit_tx.send(snapshot.clone());
        snapshot
    }

    fn override_active(&self, inner: &Inner) -> bool {
        inner
            .last_alcohol_s
            .is_some_and(|ts| self.oracle.is_fresh(ts, self.config.alcohol_override_window_s))
    }

    /// Take the dispatcher half. Callable once; the engine spawns it.
    pub fn take_dispatcher(&self) -> Option<StateDispatcher> {
        self.dispatcher_rx.lock().take().map(|rx| StateDispatcher {
            rx,
            subscribers: Arc::clone(&self.subscribers),
            timeout_s: self.config.subscriber_timeout_s,
        })
    }

    /// Get configuration.
    pub fn config(&self) -> &StateManagerConfig {
        &self.config
    }
}

/// Delivers committed snapshots to subscribers, isolated and in order.
pub struct StateDispatcher {
    rx: mpsc::UnboundedReceiver<StateSnapshot>,
    subscribers: Arc<RwLock<Vec<Arc<dyn StateSubscriber>>>>,
    timeout_s: f64,
}

impl StateDispatcher {
    /// Run until the state manager is dropped.
    pub async fn run(mut self) {
        while let Some(snapshot) = self.rx.recv().await {
            self.deliver(&snapshot).await;
        }
    }

    /// Deliver one snapshot to every subscriber.
    ///
    /// A slow subscriber is abandoned at the timeout; a failing one is
    /// logged. Neither affects the committed state or the other
    /// subscribers.
    async fn deliver(&self, snapshot: &StateSnapshot) {
        let subscribers: Vec<Arc<dyn StateSubscriber>> =
            self.subscribers.read().iter().cloned().collect();
        let timeout = std::time::Duration::from_secs_f64(self.timeout_s);

        for subscriber in subscribers {
            match tokio::time::timeout(timeout, subscriber.on_state_change(snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let failure = FusionError::SubscriberFailure {
                        subscriber: subscriber.name().to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(error = %failure, "subscriber failed");
                }
                Err(_) => {
                    tracing::warn!(
                        subscriber = subscriber.name(),
                        timeout_s = self.timeout_s,
                        "subscriber stuck, abandoned"
                    );
                }
            }
        }
    }
}
