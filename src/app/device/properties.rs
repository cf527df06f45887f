use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::app::adb::pending::Pending;

use super::DeviceSession;

pub const PROP_BUILD_API_LEVEL: &str = "ro.build.version.sdk";
pub const PROP_BUILD_CODENAME: &str = "ro.build.version.codename";
pub const PROP_BUILD_CHARACTERISTICS: &str = "ro.build.characteristics";
pub const PROP_DEVICE_MANUFACTURER: &str = "ro.product.manufacturer";
pub const PROP_DEVICE_MODEL: &str = "ro.product.model";
const PROP_CPU_ABI_LIST: &str = "ro.product.cpu.abilist";
const PROP_CPU_ABI: &str = "ro.product.cpu.abi";
const PROP_CPU_ABI2: &str = "ro.product.cpu.abi2";
const PROP_DENSITY: &str = "ro.sf.lcd_density";
const PROP_EMULATOR_DENSITY: &str = "qemu.sf.lcd_density";
const PROP_LANGUAGE: &str = "persist.sys.language";
const PROP_REGION: &str = "persist.sys.country";

/// Reported by [`DeviceSession::density`] when no density is known.
pub const DENSITY_UNKNOWN: i32 = -1;

impl DeviceSession {
    /// Best-effort read. Waits briefly once the fetcher holds a property dump,
    /// longer while the first dump may still be in flight.
    pub fn property(&self, name: &str) -> Option<String> {
        let fetcher = &self.collaborators.properties;
        let timeouts = &self.config.timeouts;
        let wait = if fetcher.has_cached_properties() {
            timeouts.property_wait()
        } else {
            timeouts.initial_property_wait()
        };
        match fetcher.property(name).wait_timeout(wait) {
            Ok(value) => value,
            Err(err) => {
                debug!(serial = %self.serial, property = name, error = %err, "property unavailable");
                None
            }
        }
    }

    /// Like [`property`](Self::property) but waits as long as the fetch takes.
    pub fn property_sync(&self, name: &str) -> Option<String> {
        match self.collaborators.properties.property(name).wait() {
            Ok(value) => value,
            Err(err) => {
                debug!(serial = %self.serial, property = name, error = %err, "property unavailable");
                None
            }
        }
    }

    pub fn property_cache_or_sync(&self, name: &str) -> Option<String> {
        self.collaborators
            .properties
            .cached_property(name)
            .or_else(|| self.property_sync(name))
    }

    /// The fetcher's handle, for callers that pick their own wait policy.
    pub fn system_property(&self, name: &str) -> Pending<Option<String>> {
        self.collaborators.properties.property(name)
    }

    pub fn properties(&self) -> HashMap<String, String> {
        self.collaborators.properties.cached_properties()
    }

    pub fn property_count(&self) -> usize {
        self.properties().len()
    }

    pub fn are_properties_set(&self) -> bool {
        self.collaborators.properties.has_cached_properties()
    }

    pub fn battery(&self, freshness: Duration) -> Pending<Option<u8>> {
        self.collaborators.battery.battery(freshness)
    }

    /// Battery percentage no older than the configured freshness, `None` on failure.
    pub fn battery_level(&self) -> Option<u8> {
        let freshness = Duration::from_millis(self.config.battery.freshness_ms);
        match self
            .battery(freshness)
            .wait_timeout(self.config.timeouts.battery_wait())
        {
            Ok(level) => level,
            Err(err) => {
                debug!(serial = %self.serial, error = %err, "battery level unavailable");
                None
            }
        }
    }

    /// Supported ABIs, preferred first.
    pub fn abis(&self) -> Vec<String> {
        if let Some(list) = self.property(PROP_CPU_ABI_LIST) {
            let abis: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|abi| !abi.is_empty())
                .map(str::to_string)
                .collect();
            if !abis.is_empty() {
                return abis;
            }
        }
        [PROP_CPU_ABI, PROP_CPU_ABI2]
            .into_iter()
            .filter_map(|name| self.property(name))
            .map(|abi| abi.trim().to_string())
            .filter(|abi| !abi.is_empty())
            .collect()
    }

    pub fn density(&self) -> i32 {
        self.property(PROP_DENSITY)
            .or_else(|| self.property(PROP_EMULATOR_DENSITY))
            .and_then(|value| value.trim().parse::<i32>().ok())
            .unwrap_or(DENSITY_UNKNOWN)
    }

    pub fn language(&self) -> Option<String> {
        self.property(PROP_LANGUAGE)
    }

    pub fn region(&self) -> Option<String> {
        self.property(PROP_REGION)
    }
}
