use cncd_settings::{Config, SettingsError};
use std::io::Write;
use tempfile::Builder;

fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml() {
    let file = write_config(
        ".toml",
        r#"
        [general]
        port = 4100
        log_level = "debug"

        [devices.i3]
        port = "serial:///dev/ttyUSB0@115200"
        firmware = "marlin"
        "#,
    );
    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.general.port, 4100);
    assert_eq!(config.general.address, "::");
    assert_eq!(config.devices["i3"].firmware, "marlin");
}

#[test]
fn test_load_json() {
    let file = write_config(
        ".json",
        r#"{"devices": {"laser": {"port": "tcp://10.0.0.2:23", "firmware": "smoothie"}}}"#,
    );
    let config = Config::load_from_file(file.path()).unwrap();
    assert_eq!(config.general.log_level, "error");
    assert_eq!(config.devices["laser"].port, "tcp://10.0.0.2:23");
}

#[test]
fn test_load_rejects_unknown_extension() {
    let file = write_config(".ini", "[general]\n");
    assert!(matches!(
        Config::load_from_file(file.path()),
        Err(SettingsError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_load_rejects_invalid_device() {
    let file = write_config(
        ".toml",
        r#"
        [devices.i3]
        port = "ttyUSB0"
        "#,
    );
    assert!(matches!(
        Config::load_from_file(file.path()),
        Err(SettingsError::InvalidSetting { .. })
    ));
}

#[test]
fn test_load_reports_syntax_errors() {
    let file = write_config(".toml", "[devices.i3\nport = 1\n");
    assert!(matches!(
        Config::load_from_file(file.path()),
        Err(SettingsError::Toml(_))
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        Config::load_from_file(std::path::Path::new("/nonexistent/cncd.toml")),
        Err(SettingsError::Read { .. })
    ));
}
