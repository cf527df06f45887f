use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::app::adb::collaborators::ShellTimeouts;
use crate::app::adb::parse::{last_non_empty_line, ls_reports_missing, parse_feature_tokens};
use crate::app::error::DeviceError;
use crate::app::models::{AndroidVersion, Feature, HardwareFeature};

use super::properties::{PROP_BUILD_API_LEVEL, PROP_BUILD_CHARACTERISTICS, PROP_BUILD_CODENAME};
use super::DeviceSession;

pub const EXTERNAL_STORAGE: &str = "EXTERNAL_STORAGE";
pub const ANDROID_DATA: &str = "ANDROID_DATA";
pub const ANDROID_ROOT: &str = "ANDROID_ROOT";

const SCREEN_RECORD_BINARY: &str = "/system/bin/screenrecord";
const SCREEN_RECORD_MIN_API: u32 = 19;
const PROCSTATS_MIN_API: u32 = 19;

/// Lazily computed device facts. Slots are filled without locking; two racing
/// first reads may both probe and the last store wins.
pub(super) struct CapabilityCache {
    version: ArcSwapOption<AndroidVersion>,
    features: ArcSwapOption<HashSet<String>>,
    hardware: ArcSwapOption<HashSet<String>>,
    screen_recorder: ArcSwapOption<bool>,
    root: AtomicBool,
    mount_points: DashMap<String, String>,
}

impl CapabilityCache {
    pub(super) fn new() -> Self {
        Self {
            version: ArcSwapOption::empty(),
            features: ArcSwapOption::empty(),
            hardware: ArcSwapOption::empty(),
            screen_recorder: ArcSwapOption::empty(),
            root: AtomicBool::new(false),
            mount_points: DashMap::new(),
        }
    }
}

impl DeviceSession {
    /// Platform version. A failed read is not cached; `AndroidVersion::DEFAULT`
    /// stands in until a read succeeds.
    pub fn version(&self) -> AndroidVersion {
        if let Some(version) = self.capabilities.version.load_full() {
            return (*version).clone();
        }
        let api_level = self
            .property(PROP_BUILD_API_LEVEL)
            .and_then(|value| value.trim().parse::<u32>().ok());
        let Some(api_level) = api_level else {
            debug!(serial = %self.serial, "api level unavailable");
            return AndroidVersion::DEFAULT;
        };
        let codename = self.property(PROP_BUILD_CODENAME);
        let version = AndroidVersion::new(api_level, codename.as_deref());
        self.capabilities
            .version
            .store(Some(Arc::new(version.clone())));
        version
    }

    pub fn supports_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::ScreenRecord => {
                self.version().is_at_least(SCREEN_RECORD_MIN_API) && self.has_screen_recorder()
            }
            Feature::Procstats => self.version().is_at_least(PROCSTATS_MIN_API),
            Feature::AbbExec | Feature::ShellV2 => feature
                .adb_token()
                .is_some_and(|token| self.features().contains(token)),
        }
    }

    /// Feature tokens advertised by both the device and the host daemon.
    /// Any failure fixes the set to empty for the rest of the session.
    pub fn features(&self) -> Arc<HashSet<String>> {
        if let Some(features) = self.capabilities.features.load_full() {
            return features;
        }
        let features = Arc::new(match self.fetch_common_features() {
            Ok(features) => features,
            Err(err) => {
                warn!(serial = %self.serial, error = %err, "feature query failed");
                HashSet::new()
            }
        });
        self.capabilities.features.store(Some(Arc::clone(&features)));
        features
    }

    fn fetch_common_features(&self) -> Result<HashSet<String>, DeviceError> {
        let transport = &self.collaborators.transport;
        let device = parse_feature_tokens(&transport.device_features(&self.serial)?);
        let host = parse_feature_tokens(&transport.host_features()?);
        Ok(device.intersection(&host).cloned().collect())
    }

    pub fn supports_hardware_feature(&self, feature: HardwareFeature) -> bool {
        self.hardware_characteristics()
            .contains(feature.characteristic())
    }

    /// Parsed `ro.build.characteristics`; empty for good if the read fails.
    pub fn hardware_characteristics(&self) -> Arc<HashSet<String>> {
        if let Some(characteristics) = self.capabilities.hardware.load_full() {
            return characteristics;
        }
        let characteristics = Arc::new(match self.property(PROP_BUILD_CHARACTERISTICS) {
            Some(value) => parse_feature_tokens(&value),
            None => {
                debug!(serial = %self.serial, "build characteristics unavailable");
                HashSet::new()
            }
        });
        self.capabilities
            .hardware
            .store(Some(Arc::clone(&characteristics)));
        characteristics
    }

    fn has_screen_recorder(&self) -> bool {
        if let Some(present) = self.capabilities.screen_recorder.load_full() {
            return *present;
        }
        let present = self.has_binary(SCREEN_RECORD_BINARY);
        self.capabilities.screen_recorder.store(Some(Arc::new(present)));
        present
    }

    /// `ls` probe; any failure counts as absent.
    fn has_binary(&self, path: &str) -> bool {
        let timeouts = ShellTimeouts::first_response(self.config.timeouts.ls_probe());
        match self.capture_shell(&format!("ls {path}"), timeouts) {
            Ok(output) => !ls_reports_missing(&output),
            Err(err) => {
                debug!(serial = %self.serial, path, error = %err, "binary probe failed");
                false
            }
        }
    }

    /// Value of a device environment variable such as [`EXTERNAL_STORAGE`].
    /// Failed lookups are not remembered.
    pub fn mount_point(&self, name: &str) -> Option<String> {
        if let Some(path) = self.capabilities.mount_points.get(name) {
            return Some(path.value().clone());
        }
        let timeouts = ShellTimeouts::first_response(self.config.timeouts.shell_response());
        let path = match self.capture_shell(&format!("echo ${name}"), timeouts) {
            Ok(output) => last_non_empty_line(&output)?,
            Err(err) => {
                debug!(serial = %self.serial, name, error = %err, "mount point lookup failed");
                return None;
            }
        };
        self.capabilities
            .mount_points
            .insert(name.to_string(), path.clone());
        Some(path)
    }

    /// Only a positive answer is remembered.
    pub fn is_root(&self) -> bool {
        if self.capabilities.root.load(Ordering::Acquire) {
            return true;
        }
        let timeouts = ShellTimeouts::first_response(self.config.timeouts.root_probe());
        let is_root = match self.capture_shell("echo $USER_ID", timeouts) {
            Ok(output) => last_non_empty_line(&output).is_some_and(|line| line.trim() == "0"),
            Err(err) => {
                debug!(serial = %self.serial, error = %err, "root probe failed");
                false
            }
        };
        if is_root {
            self.capabilities.root.store(true, Ordering::Release);
        }
        is_root
    }
}
