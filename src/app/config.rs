use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::DeviceError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdbSettings {
    /// Empty means `adb` from `PATH`.
    pub command_path: String,
}

/// Wait budgets, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Property wait once the fetcher holds any cached property.
    pub property_wait_ms: u64,
    /// Property wait while the first full property dump may still be in flight.
    pub initial_property_wait_ms: u64,
    /// Default max time to first output for shell commands.
    pub shell_response_ms: u64,
    pub ls_probe_ms: u64,
    pub root_probe_ms: u64,
    pub install_ms: u64,
    pub battery_wait_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            property_wait_ms: 250,
            initial_property_wait_ms: 2_000,
            shell_response_ms: 5_000,
            ls_probe_ms: 2_000,
            root_probe_ms: 1_000,
            install_ms: 10 * 60 * 1_000,
            battery_wait_ms: 2_000,
        }
    }
}

impl TimeoutSettings {
    pub fn property_wait(&self) -> Duration {
        Duration::from_millis(self.property_wait_ms)
    }

    pub fn initial_property_wait(&self) -> Duration {
        Duration::from_millis(self.initial_property_wait_ms)
    }

    pub fn shell_response(&self) -> Duration {
        Duration::from_millis(self.shell_response_ms)
    }

    pub fn ls_probe(&self) -> Duration {
        Duration::from_millis(self.ls_probe_ms)
    }

    pub fn root_probe(&self) -> Duration {
        Duration::from_millis(self.root_probe_ms)
    }

    pub fn install(&self) -> Duration {
        Duration::from_millis(self.install_ms)
    }

    pub fn battery_wait(&self) -> Duration {
        Duration::from_millis(self.battery_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstallSettings {
    /// Remote directory single-artifact installs are staged in.
    pub staging_dir: String,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            staging_dir: "/data/local/tmp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PropertySettings {
    /// Age after which non-`ro.*` properties are fetched again.
    pub refresh_ms: u64,
}

impl Default for PropertySettings {
    fn default() -> Self {
        Self { refresh_ms: 60_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatterySettings {
    pub freshness_ms: u64,
}

impl Default for BatterySettings {
    fn default() -> Self {
        Self {
            freshness_ms: 5 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub install: InstallSettings,
    #[serde(default)]
    pub properties: PropertySettings,
    #[serde(default)]
    pub battery: BatterySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("DEVICE_SESSION_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".device_session.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config() -> Result<SessionConfig, DeviceError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &SessionConfig) -> Result<(), DeviceError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path))
}

pub fn load_config_from_path(path: &Path) -> Result<SessionConfig, DeviceError> {
    if !path.exists() {
        return Ok(SessionConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| DeviceError::io(format!("Failed to read config: {err}")))?;
    let config: SessionConfig = serde_json::from_str(&raw)
        .map_err(|err| DeviceError::io(format!("Failed to parse config: {err}")))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &SessionConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), DeviceError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| DeviceError::io(format!("Failed to serialize config: {err}")))?;
    fs::write(path, payload)
        .map_err(|err| DeviceError::io(format!("Failed to write config: {err}")))?;
    Ok(())
}

fn validate_config(mut config: SessionConfig) -> SessionConfig {
    let defaults = TimeoutSettings::default();
    let timeouts = &mut config.timeouts;
    if timeouts.property_wait_ms == 0 {
        timeouts.property_wait_ms = defaults.property_wait_ms;
    }
    if timeouts.initial_property_wait_ms < timeouts.property_wait_ms {
        timeouts.initial_property_wait_ms = defaults
            .initial_property_wait_ms
            .max(timeouts.property_wait_ms);
    }
    if timeouts.shell_response_ms == 0 {
        timeouts.shell_response_ms = defaults.shell_response_ms;
    }
    if timeouts.ls_probe_ms == 0 {
        timeouts.ls_probe_ms = defaults.ls_probe_ms;
    }
    if timeouts.root_probe_ms == 0 {
        timeouts.root_probe_ms = defaults.root_probe_ms;
    }
    if timeouts.install_ms == 0 {
        timeouts.install_ms = defaults.install_ms;
    }
    if timeouts.battery_wait_ms == 0 {
        timeouts.battery_wait_ms = defaults.battery_wait_ms;
    }
    let staging = config.install.staging_dir.trim().trim_end_matches('/');
    config.install.staging_dir = if staging.starts_with('/') {
        staging.to_string()
    } else {
        InstallSettings::default().staging_dir
    };
    config
}
