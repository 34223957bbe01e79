//! Per-device status store.
//!
//! Devices, observers and frontends publish key/value pairs under a device
//! handle. Every update is also broadcast so frontends can follow a device
//! without polling.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;

/// Standard status keys written by the device engine
pub mod keys {
    /// Whether the device has a live link
    pub const CONNECTED: &str = "connected";
    /// Whether no file job is running
    pub const IDLE: &str = "idle";
    /// Whether the resume gate is closed
    pub const PAUSED: &str = "paused";
    /// The staged filename
    pub const SELECTED: &str = "selected";
    /// Bytes streamed over file size, written by the progress observer
    pub const PROGRESS: &str = "progress";
}

/// A status value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    /// Boolean flag
    Bool(bool),
    /// Integer counter
    Int(i64),
    /// Free text
    Text(String),
}

impl StatusValue {
    /// Returns the flag if this is a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StatusValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatusValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusValue::Bool(b) => write!(f, "{}", b),
            StatusValue::Int(i) => write!(f, "{}", i),
            StatusValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for StatusValue {
    fn from(value: bool) -> Self {
        StatusValue::Bool(value)
    }
}

impl From<i64> for StatusValue {
    fn from(value: i64) -> Self {
        StatusValue::Int(value)
    }
}

impl From<&str> for StatusValue {
    fn from(value: &str) -> Self {
        StatusValue::Text(value.to_string())
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        StatusValue::Text(value)
    }
}

/// A single broadcast status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    /// Device handle
    pub device: String,
    /// Status key
    pub key: String,
    /// New value
    pub value: StatusValue,
}

/// Sink for per-device status writes
pub trait StatusStore: Send + Sync {
    /// Set `key` to `value` for `device`
    fn update(&self, device: &str, key: &str, value: StatusValue);

    /// Read one key
    fn get(&self, device: &str, key: &str) -> Option<StatusValue>;

    /// All keys currently stored for `device`
    fn snapshot(&self, device: &str) -> BTreeMap<String, StatusValue>;
}

/// In-memory status store with change broadcasting
pub struct MemoryStatusStore {
    data: RwLock<HashMap<String, BTreeMap<String, StatusValue>>>,
    tx: broadcast::Sender<StatusUpdate>,
}

impl MemoryStatusStore {
    /// Create a new store
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer for subscribers
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self {
            data: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Subscribe to every subsequent update
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Handles that have at least one key stored
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.data.read().keys().cloned().collect();
        devices.sort();
        devices
    }
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StatusStore for MemoryStatusStore {
    fn update(&self, device: &str, key: &str, value: StatusValue) {
        tracing::trace!(device, key, %value, "status update");
        self.data
            .write()
            .entry(device.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());

        // No subscribers is the normal case
        let _ = self.tx.send(StatusUpdate {
            device: device.to_string(),
            key: key.to_string(),
            value,
        });
    }

    fn get(&self, device: &str, key: &str) -> Option<StatusValue> {
        self.data
            .read()
            .get(device)
            .and_then(|values| values.get(key).cloned())
    }

    fn snapshot(&self, device: &str) -> BTreeMap<String, StatusValue> {
        self.data.read().get(device).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for MemoryStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStatusStore")
            .field("devices", &self.devices())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_get() {
        let store = MemoryStatusStore::default();
        store.update("i3", keys::CONNECTED, true.into());
        store.update("i3", keys::SELECTED, "part.gcode".into());

        assert_eq!(
            store.get("i3", keys::CONNECTED),
            Some(StatusValue::Bool(true))
        );
        assert_eq!(store.get("i3", keys::IDLE), None);
        assert_eq!(store.get("cnc", keys::CONNECTED), None);
        assert_eq!(store.snapshot("i3").len(), 2);
        assert_eq!(store.devices(), vec!["i3".to_string()]);
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let store = MemoryStatusStore::default();
        let mut rx = store.subscribe();
        assert_eq!(store.subscriber_count(), 1);

        store.update("i3", keys::PAUSED, false.into());
        let update = rx.recv().await.unwrap();
        assert_eq!(update.device, "i3");
        assert_eq!(update.key, keys::PAUSED);
        assert_eq!(update.value, StatusValue::Bool(false));
    }

    #[test]
    fn test_value_display() {
        assert_eq!(StatusValue::Bool(true).to_string(), "true");
        assert_eq!(StatusValue::Int(-3).to_string(), "-3");
        assert_eq!(StatusValue::from("12/40").to_string(), "12/40");
        assert_eq!(
            serde_json::to_string(&StatusValue::Bool(false)).unwrap(),
            "false"
        );
    }
}
