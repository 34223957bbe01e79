//! Built-in progress observer.
//!
//! Tracks how far a file job has streamed, in bytes, by watching the
//! open and readline extension points.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::observer::DeviceObserver;
use crate::status::{keys, StatusStore};

/// Progress of one file job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes of G-code passed to the device so far
    pub progress: u64,
    /// Size of the file in bytes
    pub total: u64,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.progress, self.total)
    }
}

/// Observer publishing the `progress` status key
pub struct ProgressObserver {
    status: Arc<dyn StatusStore>,
    devices: Mutex<HashMap<String, Progress>>,
}

impl ProgressObserver {
    pub fn new(status: Arc<dyn StatusStore>) -> Self {
        Self {
            status,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Current progress of `device`, zero if it never ran a job
    pub fn progress(&self, device: &str) -> Progress {
        self.devices.lock().get(device).copied().unwrap_or_default()
    }

    fn publish(&self, device: &str, progress: Progress) {
        self.status
            .update(device, keys::PROGRESS, progress.to_string().into());
    }
}

#[async_trait]
impl DeviceObserver for ProgressObserver {
    fn name(&self) -> &str {
        "progress"
    }

    async fn gcode_open(&self, device: &str, filename: String) -> anyhow::Result<String> {
        let total = tokio::fs::metadata(&filename).await?.len();
        let progress = Progress { progress: 0, total };
        self.devices.lock().insert(device.to_string(), progress);
        self.publish(device, progress);
        Ok(filename)
    }

    async fn gcode_readline(&self, device: &str, line: String) -> anyhow::Result<String> {
        let progress = {
            let mut devices = self.devices.lock();
            let entry = devices.entry(device.to_string()).or_default();
            entry.progress += line.len() as u64;
            *entry
        };
        self.publish(device, progress);
        Ok(line)
    }
}
