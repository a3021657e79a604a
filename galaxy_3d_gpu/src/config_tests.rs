//! Unit tests for config.rs

use crate::config::*;
use crate::error::Error;
use crate::graphics::Backend;

#[test]
fn test_default_config() {
    let config = DeviceConfig::default();
    assert_eq!(config.enable_validation, cfg!(debug_assertions));
    assert!(!config.panic_on_validation_error);
    assert_eq!(config.frames_in_flight, 2);
    assert_eq!(config.debug_severity, DebugSeverity::ErrorsAndWarnings);
}

#[test]
fn test_empty_toml_uses_defaults() {
    let settings = GpuSettings::from_toml_str("").expect("empty settings");
    assert_eq!(settings, GpuSettings::default());
    assert_eq!(settings.backend, Backend::Default);
}

#[test]
fn test_full_toml() {
    let text = r#"
        backend = "Software"

        [device]
        app_name = "Viewer"
        app_version = [2, 1, 0]
        enable_validation = true
        panic_on_validation_error = true
        debug_severity = "All"
        frames_in_flight = 3
    "#;
    let settings = GpuSettings::from_toml_str(text).expect("valid settings");
    assert_eq!(settings.backend, Backend::Software);
    assert_eq!(settings.device.app_name, "Viewer");
    assert_eq!(settings.device.app_version, (2, 1, 0));
    assert!(settings.device.enable_validation);
    assert!(settings.device.panic_on_validation_error);
    assert_eq!(settings.device.debug_severity, DebugSeverity::All);
    assert_eq!(settings.device.frames_in_flight, 3);
}

#[test]
fn test_partial_device_table_keeps_other_defaults() {
    let settings = GpuSettings::from_toml_str("[device]\nenable_validation = false\n").expect("valid");
    assert!(!settings.device.enable_validation);
    assert_eq!(settings.device.app_name, DeviceConfig::default().app_name);
}

#[test]
fn test_unknown_backend_is_rejected() {
    let result = GpuSettings::from_toml_str("backend = \"Metal\"");
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

#[test]
fn test_zero_frames_in_flight_is_rejected() {
    let result = GpuSettings::from_toml_str("[device]\nframes_in_flight = 0\n");
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

#[test]
fn test_load_missing_file() {
    let result = GpuSettings::load("/nonexistent/galaxy3d_gpu.toml");
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

#[test]
fn test_validation_active_follows_feature() {
    let mut config = DeviceConfig::default();
    config.enable_validation = true;
    assert_eq!(config.validation_active(), cfg!(feature = "validation"));
    config.enable_validation = false;
    assert!(!config.validation_active());
}
