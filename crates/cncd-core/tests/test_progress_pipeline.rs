use async_trait::async_trait;
use cncd_core::{keys, DeviceObserver, HookRegistry, MemoryStatusStore, ProgressObserver, StatusStore, StatusValue};
use std::io::Write;
use std::sync::Arc;

/// Upper-cases every line it sees
struct Shout;

#[async_trait]
impl DeviceObserver for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    async fn gcode_readline(&self, _device: &str, line: String) -> anyhow::Result<String> {
        Ok(line.to_uppercase())
    }
}

#[tokio::test]
async fn test_progress_published_through_registry() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "g28\ng1 x10\n").unwrap();
    let filename = file.path().display().to_string();

    let status = Arc::new(MemoryStatusStore::default());
    let mut updates = status.subscribe();
    let progress = Arc::new(ProgressObserver::new(status.clone()));

    let hooks = HookRegistry::new();
    hooks.register(Arc::new(Shout));
    hooks.register(progress.clone());

    assert_eq!(hooks.gcode_open("i3", filename.clone()).await, filename);
    assert_eq!(hooks.gcode_readline("i3", "g28".to_string()).await, "G28");
    assert_eq!(hooks.gcode_readline("i3", "g1 x10".to_string()).await, "G1 X10");
    hooks.gcode_done("i3").await;

    assert_eq!(progress.progress("i3").progress, 9);
    assert_eq!(progress.progress("i3").total, 11);
    assert_eq!(
        status.get("i3", keys::PROGRESS),
        Some(StatusValue::Text("9/11".to_string()))
    );

    let first = updates.recv().await.unwrap();
    assert_eq!(first.device, "i3");
    assert_eq!(first.key, keys::PROGRESS);
    assert_eq!(first.value, StatusValue::Text("0/11".to_string()));
}

#[tokio::test]
async fn test_devices_are_tracked_separately() {
    let status = Arc::new(MemoryStatusStore::default());
    let progress = Arc::new(ProgressObserver::new(status.clone()));
    let hooks = HookRegistry::new();
    hooks.register(progress.clone());

    hooks.gcode_readline("i3", "G28".to_string()).await;
    hooks.gcode_readline("mill", "G0 Z5".to_string()).await;

    assert_eq!(progress.progress("i3").progress, 3);
    assert_eq!(progress.progress("mill").progress, 5);
    assert_eq!(progress.progress("laser").progress, 0);
    assert_eq!(status.devices(), vec!["i3".to_string(), "mill".to_string()]);
}
