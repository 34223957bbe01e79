//! Device observer interface
//!
//! Defines the typed extension points the device engine invokes.

use async_trait::async_trait;

/// Handle for a registered observer.
///
/// Uniquely identifies a registration. Can be used to unregister
/// the observer from a [`HookRegistry`](super::HookRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub(crate) uuid::Uuid);

impl std::fmt::Display for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Obs({})", &self.0.to_string()[..8])
    }
}

/// Observer trait for device engine extension points
///
/// Implement this trait to run additional logic at named points of a
/// device's life. Every method has a pass-through default, so observers
/// only override what they care about. Errors are isolated by the
/// registry and never reach the engine.
#[async_trait]
pub trait DeviceObserver: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    /// `connect_done`: the device opened its link
    async fn connect_done(&self, _device: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// `disconnect_done`: the link was torn down
    async fn disconnect_done(&self, _device: &str, _cause: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// `gcode_open_hook`: a file job is about to open `filename`.
    /// May return a rewritten filename.
    async fn gcode_open(&self, _device: &str, filename: String) -> anyhow::Result<String> {
        Ok(filename)
    }

    /// `gcode_readline_hook`: a file line survived comment stripping.
    /// May return a rewritten line.
    async fn gcode_readline(&self, _device: &str, line: String) -> anyhow::Result<String> {
        Ok(line)
    }

    /// `gcode_done_hook`: the file job finished or was cancelled
    async fn gcode_done(&self, _device: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// `rx_hook`: a line was received from the device (prompt already stripped)
    async fn rx(&self, _device: &str, _line: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
