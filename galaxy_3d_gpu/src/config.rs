//! Device configuration, loadable from TOML
//!
//! ```toml
//! backend = "Vulkan"
//!
//! [device]
//! app_name = "Viewer"
//! enable_validation = true
//! debug_severity = "ErrorsAndWarnings"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::graphics::Backend;

/// Which native validation messages are forwarded to the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DebugSeverity {
    ErrorsOnly,
    #[default]
    ErrorsAndWarnings,
    All,
}

/// Device-level options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Application name (reported to the native API)
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Run usage-contract checks and native validation layers
    pub enable_validation: bool,
    /// Panic on the first state-machine misuse instead of returning an error
    pub panic_on_validation_error: bool,
    /// Native validation message filter
    pub debug_severity: DebugSeverity,
    /// Command buffers recorded ahead of the GPU
    pub frames_in_flight: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Galaxy3D Application".to_string(),
            app_version: (1, 0, 0),
            enable_validation: cfg!(debug_assertions),
            panic_on_validation_error: false,
            debug_severity: DebugSeverity::default(),
            frames_in_flight: 2,
        }
    }
}

impl DeviceConfig {
    /// True when usage-contract checks run for this device
    pub fn validation_active(&self) -> bool {
        cfg!(feature = "validation") && self.enable_validation
    }
}

/// Top-level settings file: backend choice plus device options
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    pub backend: Backend,
    pub device: DeviceConfig,
}

impl GpuSettings {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: GpuSettings = toml::from_str(text).map_err(|e| {
            crate::engine_error!("galaxy3d::config", "Invalid GPU settings: {}", e);
            Error::InitializationFailed(format!("invalid GPU settings: {}", e))
        })?;
        if settings.device.frames_in_flight == 0 {
            return Err(Error::InitializationFailed(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InitializationFailed(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
