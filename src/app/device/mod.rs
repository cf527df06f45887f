//! One connected device as seen from the host.
//!
//! A [`DeviceSession`] is created by whatever tracks the adb daemon's device
//! list, and that same owner applies state changes and attaches clients. Callers
//! use the session for property reads, capability checks, shell commands and
//! install/transfer workflows.

mod capabilities;
mod clients;
mod install;
mod properties;
mod screenrecord;
mod shell;
mod sync;
#[cfg(test)]
mod tests;

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use arc_swap::ArcSwapOption;
use regex::Regex;
use tracing::{debug, info};

use crate::app::adb::cli::{AdbCliSync, AdbCliTransport};
use crate::app::adb::collaborators::{
    BatteryFetcher, ChangeBroadcaster, DisconnectionTracker, NoopBroadcaster,
    NoopDisconnectionTracker, PropertyFetcher, SplitInstaller, SyncConnector, Transport,
    UnsupportedSplitInstaller,
};
use crate::app::adb::fetchers::{DumpsysBatteryFetcher, GetpropFetcher};
use crate::app::adb::locator::locate_adb;
use crate::app::adb::parse::clean_for_display;
use crate::app::config::SessionConfig;
use crate::app::error::DeviceError;
use crate::app::models::{DeviceState, InstallMetrics};

use capabilities::CapabilityCache;
use clients::ClientRegistry;

pub use capabilities::{ANDROID_DATA, ANDROID_ROOT, EXTERNAL_STORAGE};
pub use clients::{Client, ClientEvent, ClientListener, UNKNOWN_CLIENT_NAME};
pub use properties::{
    DENSITY_UNKNOWN, PROP_BUILD_API_LEVEL, PROP_BUILD_CHARACTERISTICS, PROP_BUILD_CODENAME,
    PROP_DEVICE_MANUFACTURER, PROP_DEVICE_MODEL,
};
pub use screenrecord::ScreenRecorderOptions;

/// Everything a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub sync: Arc<dyn SyncConnector>,
    pub properties: Arc<dyn PropertyFetcher>,
    pub battery: Arc<dyn BatteryFetcher>,
    pub broadcaster: Arc<dyn ChangeBroadcaster>,
    pub disconnections: Arc<dyn DisconnectionTracker>,
    pub split_installer: Arc<dyn SplitInstaller>,
}

impl Collaborators {
    /// Collaborators backed by the `adb` executable at `program`, with no-op
    /// change notification and no multi-APK support.
    pub fn adb_cli(program: &str, serial: &str, config: &SessionConfig) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(AdbCliTransport::new(program));
        let refresh = std::time::Duration::from_millis(config.properties.refresh_ms);
        Self {
            sync: Arc::new(AdbCliSync::new(program)),
            properties: Arc::new(GetpropFetcher::new(Arc::clone(&transport), serial, refresh)),
            battery: Arc::new(DumpsysBatteryFetcher::new(Arc::clone(&transport), serial)),
            transport,
            broadcaster: Arc::new(NoopBroadcaster),
            disconnections: Arc::new(NoopDisconnectionTracker),
            split_installer: Arc::new(UnsupportedSplitInstaller),
        }
    }
}

fn emulator_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^emulator-(\d+)$").ok())
        .as_ref()
}

pub struct DeviceSession {
    serial: String,
    state: RwLock<DeviceState>,
    avd_name: RwLock<Option<String>>,
    display_name: OnceLock<String>,
    config: SessionConfig,
    collaborators: Collaborators,
    capabilities: CapabilityCache,
    registry: ClientRegistry,
    last_install_metrics: ArcSwapOption<InstallMetrics>,
}

impl DeviceSession {
    pub fn new(
        serial: impl Into<String>,
        state: DeviceState,
        collaborators: Collaborators,
        config: SessionConfig,
    ) -> Arc<Self> {
        let serial = serial.into();
        debug!(serial = %serial, state = ?state, "device session created");
        Arc::new(Self {
            serial,
            state: RwLock::new(state),
            avd_name: RwLock::new(None),
            display_name: OnceLock::new(),
            config,
            collaborators,
            capabilities: CapabilityCache::new(),
            registry: ClientRegistry::new(),
            last_install_metrics: ArcSwapOption::empty(),
        })
    }

    /// Session talking to the device through the `adb` executable named in `config`.
    pub fn with_adb(
        serial: impl Into<String>,
        state: DeviceState,
        config: SessionConfig,
    ) -> Result<Arc<Self>, DeviceError> {
        let serial = serial.into();
        let program = locate_adb(&config.adb)?;
        let collaborators = Collaborators::adb_cli(&program, &serial, &config);
        Ok(Self::new(serial, state, collaborators, config))
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_emulator(&self) -> bool {
        emulator_pattern().is_some_and(|re| re.is_match(&self.serial))
    }

    /// Console port encoded in an `emulator-<port>` serial.
    pub fn emulator_console_port(&self) -> Option<u16> {
        let caps = emulator_pattern()?.captures(&self.serial)?;
        caps[1].parse().ok()
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applied by the device tracker only.
    pub fn set_state(&self, state: DeviceState) {
        let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            info!(serial = %self.serial, from = ?*current, to = ?state, "device state changed");
            *current = state;
        }
    }

    pub fn is_online(&self) -> bool {
        self.state() == DeviceState::Online
    }

    pub fn is_offline(&self) -> bool {
        self.state() == DeviceState::Offline
    }

    pub fn is_bootloader(&self) -> bool {
        self.state() == DeviceState::Bootloader
    }

    pub fn avd_name(&self) -> Option<String> {
        self.avd_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_avd_name(&self, name: Option<String>) -> Result<(), DeviceError> {
        if !self.is_emulator() {
            return Err(DeviceError::rejected(format!(
                "{} is not an emulator; it cannot carry an AVD name",
                self.serial
            )));
        }
        *self.avd_name.write().unwrap_or_else(PoisonError::into_inner) = name;
        Ok(())
    }

    /// Human readable name. Fixed for the session's lifetime once computed
    /// while the device is online.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.display_name.get() {
            return name.clone();
        }
        let name = self.build_display_name();
        if self.is_online() {
            return self.display_name.get_or_init(|| name).clone();
        }
        name
    }

    fn build_display_name(&self) -> String {
        if self.is_emulator() {
            return match self.avd_name() {
                Some(avd) => format!("{avd} [{}]", self.serial),
                None => self.serial.clone(),
            };
        }
        let mut parts: Vec<String> = [PROP_DEVICE_MANUFACTURER, PROP_DEVICE_MODEL]
            .into_iter()
            .filter_map(|name| self.property(name))
            .map(|value| clean_for_display(&value))
            .filter(|value| !value.is_empty())
            .collect();
        parts.push(self.serial.clone());
        parts.join("-")
    }

    /// Timings of the most recent install attempt.
    pub fn last_install_metrics(&self) -> Option<InstallMetrics> {
        self.last_install_metrics.load_full().map(|metrics| *metrics)
    }

    fn record_install_metrics(&self, metrics: InstallMetrics) {
        self.last_install_metrics.store(Some(Arc::new(metrics)));
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("serial", &self.serial)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
