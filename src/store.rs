//! Keyed hash store contract.
//!
//! The engine is bus-agnostic: any keyed store with change notifications
//! satisfies [`DataStore`]. [`MemoryStore`] is the in-process
//! implementation used by tests and single-binary deployments; a
//! networked deployment would back the same trait with its pub/sub store.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::clock::FreshnessOracle;
use crate::Result;

/// Well-known record keys.
pub mod keys {
    /// Latest vision sample.
    pub const VISION: &str = "data:vision";
    /// Latest biometric sample.
    pub const HR: &str = "data:hr";
    /// Ambient temperature/humidity, display enrichment only.
    pub const ENV: &str = "data:env";
    /// Most recent alcohol detection.
    pub const ALCOHOL: &str = "data:alcohol_detected";
    /// Profile-fetch request from the authenticator.
    pub const PILOT_ID_REQUEST: &str = "data:pilot_id_request";
    /// Fusion output, written every tick.
    pub const FUSION: &str = "data:fusion";
    /// Fatigue alert, written on stage change.
    pub const FATIGUE_ALERT: &str = "data:fatigue_alert";
    /// Authoritative system state snapshot.
    pub const STATE_CURRENT: &str = "state:current";

    /// Pilot profile key for an id.
    pub fn pilot(id: &str) -> String {
        format!("data:pilot:{id}")
    }
}

/// Keyed hash store with change notifications.
pub trait DataStore: Send + Sync {
    /// Store a record under `key`, notifying subscribers.
    fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Fetch the record under `key`, if present and unexpired.
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Remove the record under `key`.
    fn delete(&self, key: &str) -> Result<()>;

    /// Subscribe to key-change notifications.
    fn watch(&self) -> broadcast::Receiver<String>;
}

struct Record {
    value: serde_json::Value,
    /// Monotonic expiry; None for persistent records.
    expires_at_s: Option<f64>,
}

/// In-process [`DataStore`] with per-record TTL.
///
/// Pilot profiles and the state record are persistent; everything else
/// ages out after `ttl_s` the way a volatile sensor reading should.
pub struct MemoryStore {
    records: RwLock<HashMap<String, Record>>,
    notify_tx: broadcast::Sender<String>,
    oracle: FreshnessOracle,
    ttl_s: f64,
}

impl MemoryStore {
    /// Create a store with the given record TTL.
    pub fn new(ttl_s: f64, oracle: FreshnessOracle) -> Self {
        let (notify_tx, _) = broadcast::channel(256);
        Self {
            records: RwLock::new(HashMap::new()),
            notify_tx,
            oracle,
            ttl_s,
        }
    }

    fn is_persistent(key: &str) -> bool {
        key.starts_with("data:pilot:") || key.starts_with("state:")
    }
}

impl DataStore for MemoryStore {
    fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let expires_at_s =
            (!Self::is_persistent(key)).then(|| self.oracle.now() + self.ttl_s);
        self.records.write().insert(
            key.to_string(),
            Record {
                value,
                expires_at_s,
            },
        );
        // No receivers is fine; ignore lagging subscribers too.
        let _ = self.notify_tx.send(key.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let records = self.records.read();
        Ok(records.get(key).and_then(|record| {
            match record.expires_at_s {
                Some(expiry) if self.oracle.now() > expiry => None,
                _ => Some(record.value.clone()),
            }
        }))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.records.write().remove(key);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<String> {
        self.notify_tx.subscribe()
    }
}

/// Exponential backoff for store reconnects, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_s: f64,
    cap_s: f64,
    current_s: f64,
}

impl Backoff {
    /// Create a backoff starting at `initial_s`, doubling up to `cap_s`.
    pub fn new(initial_s: f64, cap_s: f64) -> Self {
        Self {
            initial_s,
            cap_s,
            current_s: initial_s,
        }
    }

    /// Delay to wait before the next attempt; doubles the internal state.
    pub fn next_delay(&mut self) -> std::time::Duration {
        let delay = self.current_s;
        self.current_s = (self.current_s * 2.0).min(self.cap_s);
        std::time::Duration::from_secs_f64(delay)
    }

    /// Reset after a successful attempt.
    pub fn reset(&mut self) {
        self.current_s = self.initial_s;
    }
}
