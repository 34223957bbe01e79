//! Observer registry.
//!
//! Holds the observers attached to the engine's extension points and
//! dispatches each hook to them in registration order. Each observer runs
//! in its own task so an error or a panic stays with that observer.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::observer::{DeviceObserver, ObserverHandle};
use crate::error::ExtensionFailure;

/// Consecutive failures after which an observer is unregistered
pub const DEFAULT_MAX_FAILURES: u32 = 3;

struct Registered {
    handle: ObserverHandle,
    observer: Arc<dyn DeviceObserver>,
    failures: AtomicU32,
}

/// Registry of device observers
///
/// Passed by reference (`Arc<HookRegistry>`) to every component that
/// registers or invokes hooks.
pub struct HookRegistry {
    observers: RwLock<Vec<Arc<Registered>>>,
    max_failures: u32,
}

impl HookRegistry {
    /// Create an empty registry with the default failure limit
    pub fn new() -> Self {
        Self::with_max_failures(DEFAULT_MAX_FAILURES)
    }

    /// Create an empty registry that drops observers after `max_failures`
    /// consecutive failures
    pub fn with_max_failures(max_failures: u32) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            max_failures: max_failures.max(1),
        }
    }

    /// Register an observer. Observers are invoked in registration order.
    pub fn register(&self, observer: Arc<dyn DeviceObserver>) -> ObserverHandle {
        let handle = ObserverHandle(Uuid::new_v4());
        tracing::debug!("Observer '{}' registered as {}", observer.name(), handle);
        self.observers.write().push(Arc::new(Registered {
            handle,
            observer,
            failures: AtomicU32::new(0),
        }));
        handle
    }

    /// Unregister an observer
    ///
    /// Returns true if the observer was found and removed.
    pub fn unregister(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|entry| entry.handle != handle);
        before != observers.len()
    }

    /// Get the number of registered observers
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Names of the registered observers, in invocation order
    pub fn observer_names(&self) -> Vec<String> {
        self.observers
            .read()
            .iter()
            .map(|entry| entry.observer.name().to_string())
            .collect()
    }

    pub async fn connect_done(&self, device: &str) {
        for entry in self.snapshot() {
            let device = device.to_string();
            self.call("connect_done", &entry, move |obs| async move {
                obs.connect_done(&device).await
            })
            .await;
        }
    }

    pub async fn disconnect_done(&self, device: &str, cause: &str) {
        for entry in self.snapshot() {
            let (device, cause) = (device.to_string(), cause.to_string());
            self.call("disconnect_done", &entry, move |obs| async move {
                obs.disconnect_done(&device, &cause).await
            })
            .await;
        }
    }

    /// Run `gcode_open_hook`, threading the filename through every observer.
    /// A failing observer leaves the filename as it was.
    pub async fn gcode_open(&self, device: &str, filename: String) -> String {
        let mut filename = filename;
        for entry in self.snapshot() {
            let device = device.to_string();
            let current = filename.clone();
            if let Some(rewritten) = self
                .call("gcode_open_hook", &entry, move |obs| async move {
                    obs.gcode_open(&device, current).await
                })
                .await
            {
                filename = rewritten;
            }
        }
        filename
    }

    /// Run `gcode_readline_hook`, threading the line through every observer.
    pub async fn gcode_readline(&self, device: &str, line: String) -> String {
        let mut line = line;
        for entry in self.snapshot() {
            let device = device.to_string();
            let current = line.clone();
            if let Some(rewritten) = self
                .call("gcode_readline_hook", &entry, move |obs| async move {
                    obs.gcode_readline(&device, current).await
                })
                .await
            {
                line = rewritten;
            }
        }
        line
    }

    pub async fn gcode_done(&self, device: &str) {
        for entry in self.snapshot() {
            let device = device.to_string();
            self.call("gcode_done_hook", &entry, move |obs| async move {
                obs.gcode_done(&device).await
            })
            .await;
        }
    }

    pub async fn rx(&self, device: &str, line: &str) {
        for entry in self.snapshot() {
            let (device, line) = (device.to_string(), line.to_string());
            self.call("rx_hook", &entry, move |obs| async move {
                obs.rx(&device, &line).await
            })
            .await;
        }
    }

    fn snapshot(&self) -> Vec<Arc<Registered>> {
        self.observers.read().clone()
    }

    async fn call<T, F, Fut>(&self, hook: &str, entry: &Arc<Registered>, f: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn DeviceObserver>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let outcome = tokio::spawn(f(entry.observer.clone())).await;
        let failure = match outcome {
            Ok(Ok(value)) => {
                entry.failures.store(0, Ordering::Relaxed);
                return Some(value);
            }
            Ok(Err(e)) => ExtensionFailure::ObserverFailed {
                observer: entry.observer.name().to_string(),
                hook: hook.to_string(),
                reason: format!("{:#}", e),
            },
            Err(_) => ExtensionFailure::ObserverPanicked {
                observer: entry.observer.name().to_string(),
                hook: hook.to_string(),
            },
        };
        self.record_failure(entry, failure);
        None
    }

    fn record_failure(&self, entry: &Arc<Registered>, failure: ExtensionFailure) {
        tracing::error!("{}", failure);
        let failures = entry.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.max_failures && self.unregister(entry.handle) {
            tracing::warn!(
                "Observer '{}' failed {} times in a row, unregistered",
                entry.observer.name(),
                failures
            );
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("observers", &self.observer_names())
            .field("max_failures", &self.max_failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        name: String,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DeviceObserver for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect_done(&self, device: &str) -> anyhow::Result<()> {
            self.calls.lock().push(format!("{}:connect:{}", self.name, device));
            Ok(())
        }

        async fn gcode_readline(&self, _device: &str, line: String) -> anyhow::Result<String> {
            Ok(format!("{} ; {}", line, self.name))
        }
    }

    struct Failing;

    #[async_trait]
    impl DeviceObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn rx(&self, _device: &str, _line: &str) -> anyhow::Result<()> {
            anyhow::bail!("broken pipe")
        }

        async fn gcode_open(&self, _device: &str, _filename: String) -> anyhow::Result<String> {
            panic!("observer bug")
        }
    }

    #[tokio::test]
    async fn test_register_unregister_observer() {
        let registry = HookRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let handle = registry.register(Arc::new(Recorder {
            name: "a".to_string(),
            calls: calls.clone(),
        }));
        assert_eq!(registry.observer_count(), 1);
        assert!(registry.unregister(handle));
        assert!(!registry.unregister(handle));
        assert_eq!(registry.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_observers_called_in_order() {
        let registry = HookRegistry::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            registry.register(Arc::new(Recorder {
                name: name.to_string(),
                calls: calls.clone(),
            }));
        }

        registry.connect_done("i3").await;
        assert_eq!(
            *calls.lock(),
            vec!["first:connect:i3".to_string(), "second:connect:i3".to_string()]
        );

        let line = registry.gcode_readline("i3", "G1 X1".to_string()).await;
        assert_eq!(line, "G1 X1 ; first ; second");
    }

    #[tokio::test]
    async fn test_failing_observer_is_isolated_and_dropped() {
        let registry = HookRegistry::with_max_failures(2);
        let calls = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Recorder {
            name: "ok".to_string(),
            calls: calls.clone(),
        }));

        registry.rx("i3", "ok").await;
        assert_eq!(registry.observer_count(), 2);

        registry.rx("i3", "ok").await;
        assert_eq!(registry.observer_names(), vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_panicking_observer_keeps_filename() {
        let registry = HookRegistry::new();
        registry.register(Arc::new(Failing));
        let filename = registry.gcode_open("i3", "part.gcode".to_string()).await;
        assert_eq!(filename, "part.gcode");
    }
}
