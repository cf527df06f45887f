use std::fmt;
use std::ops::BitOr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Offline,
    Bootloader,
    Online,
    Recovery,
    Disconnected,
    Unauthorized,
    Sideload,
    Authorizing,
    Connecting,
    Rescue,
}

impl DeviceState {
    /// Maps the state word printed by `adb devices` / `track-devices`.
    pub fn from_adb(state: &str) -> Option<Self> {
        match state.trim() {
            "device" => Some(DeviceState::Online),
            "offline" => Some(DeviceState::Offline),
            "bootloader" => Some(DeviceState::Bootloader),
            "recovery" => Some(DeviceState::Recovery),
            "unauthorized" => Some(DeviceState::Unauthorized),
            "sideload" => Some(DeviceState::Sideload),
            "authorizing" => Some(DeviceState::Authorizing),
            "connecting" => Some(DeviceState::Connecting),
            "rescue" => Some(DeviceState::Rescue),
            "disconnected" => Some(DeviceState::Disconnected),
            _ => None,
        }
    }

    pub fn as_adb(&self) -> &'static str {
        match self {
            DeviceState::Online => "device",
            DeviceState::Offline => "offline",
            DeviceState::Bootloader => "bootloader",
            DeviceState::Recovery => "recovery",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Sideload => "sideload",
            DeviceState::Authorizing => "authorizing",
            DeviceState::Connecting => "connecting",
            DeviceState::Rescue => "rescue",
            DeviceState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub transport_id: Option<String>,
}

/// Platform API level plus preview codename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AndroidVersion {
    pub api_level: u32,
    pub codename: Option<String>,
}

impl AndroidVersion {
    pub const DEFAULT: AndroidVersion = AndroidVersion {
        api_level: 1,
        codename: None,
    };

    /// `REL` (or an empty codename) marks a release build.
    pub fn new(api_level: u32, codename: Option<&str>) -> Self {
        let codename = codename
            .map(str::trim)
            .filter(|value| !value.is_empty() && *value != "REL")
            .map(str::to_string);
        Self {
            api_level,
            codename,
        }
    }

    pub fn is_preview(&self) -> bool {
        self.codename.is_some()
    }

    /// A preview build already carries the next API level's features.
    pub fn feature_level(&self) -> u32 {
        if self.is_preview() {
            self.api_level.saturating_add(1)
        } else {
            self.api_level
        }
    }

    pub fn is_at_least(&self, api_level: u32) -> bool {
        self.feature_level() >= api_level
    }
}

impl Default for AndroidVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for AndroidVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.codename {
            Some(codename) => write!(f, "API {} ({codename} preview)", self.api_level),
            None => write!(f, "API {}", self.api_level),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `screenrecord` binary present (API 19+).
    ScreenRecord,
    /// `dumpsys procstats` available (API 19+).
    Procstats,
    /// Fast binder exec service advertised by both host and device.
    AbbExec,
    ShellV2,
}

impl Feature {
    pub fn adb_token(&self) -> Option<&'static str> {
        match self {
            Feature::AbbExec => Some("abb_exec"),
            Feature::ShellV2 => Some("shell_v2"),
            Feature::ScreenRecord | Feature::Procstats => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HardwareFeature {
    Watch,
    Embedded,
    Tv,
    Automotive,
}

impl HardwareFeature {
    pub fn characteristic(&self) -> &'static str {
        match self {
            HardwareFeature::Watch => "watch",
            HardwareFeature::Embedded => "embedded",
            HardwareFeature::Tv => "tv",
            HardwareFeature::Automotive => "automotive",
        }
    }
}

/// Timestamps bracketing the upload and install phases of one install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallMetrics {
    pub upload_started: Instant,
    pub upload_finished: Instant,
    pub install_finished: Instant,
    pub recorded_at: DateTime<Utc>,
}

impl InstallMetrics {
    pub fn new(upload_started: Instant, upload_finished: Instant, install_finished: Instant) -> Self {
        Self {
            upload_started,
            upload_finished,
            install_finished,
            recorded_at: Utc::now(),
        }
    }

    pub fn upload_duration(&self) -> Duration {
        self.upload_finished.saturating_duration_since(self.upload_started)
    }

    pub fn install_duration(&self) -> Duration {
        self.install_finished.saturating_duration_since(self.upload_finished)
    }

    pub fn total_duration(&self) -> Duration {
        self.install_finished.saturating_duration_since(self.upload_started)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InstallErrorCode {
    InstallFailedAlreadyExists,
    InstallFailedUpdateIncompatible,
    InstallFailedDuplicatePackage,
    InstallFailedOlderSdk,
    InstallFailedNewerSdk,
    InstallFailedVersionDowngrade,
    InstallFailedInsufficientStorage,
    InstallFailedMediaUnavailable,
    InstallFailedUserRestricted,
    InstallFailedVerificationFailure,
    InstallParseFailedNotApk,
    InstallParseFailedBadManifest,
    InstallParseFailedNoCertificates,
    InstallParseFailedInconsistentCertificates,
    InstallFailedInvalidApk,
    InstallFailedAborted,
    InstallFailedNoMatchingAbis,
    InstallFailedTestOnly,
    DeleteFailedInternalError,
    UnknownError,
}

impl InstallErrorCode {
    const KNOWN: [InstallErrorCode; 19] = [
        InstallErrorCode::InstallFailedAlreadyExists,
        InstallErrorCode::InstallFailedUpdateIncompatible,
        InstallErrorCode::InstallFailedDuplicatePackage,
        InstallErrorCode::InstallFailedOlderSdk,
        InstallErrorCode::InstallFailedNewerSdk,
        InstallErrorCode::InstallFailedVersionDowngrade,
        InstallErrorCode::InstallFailedInsufficientStorage,
        InstallErrorCode::InstallFailedMediaUnavailable,
        InstallErrorCode::InstallFailedUserRestricted,
        InstallErrorCode::InstallFailedVerificationFailure,
        InstallErrorCode::InstallParseFailedNotApk,
        InstallErrorCode::InstallParseFailedBadManifest,
        InstallErrorCode::InstallParseFailedNoCertificates,
        InstallErrorCode::InstallParseFailedInconsistentCertificates,
        InstallErrorCode::InstallFailedInvalidApk,
        InstallErrorCode::InstallFailedAborted,
        InstallErrorCode::InstallFailedNoMatchingAbis,
        InstallErrorCode::InstallFailedTestOnly,
        InstallErrorCode::DeleteFailedInternalError,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            InstallErrorCode::InstallFailedAlreadyExists => "INSTALL_FAILED_ALREADY_EXISTS",
            InstallErrorCode::InstallFailedUpdateIncompatible => {
                "INSTALL_FAILED_UPDATE_INCOMPATIBLE"
            }
            InstallErrorCode::InstallFailedDuplicatePackage => "INSTALL_FAILED_DUPLICATE_PACKAGE",
            InstallErrorCode::InstallFailedOlderSdk => "INSTALL_FAILED_OLDER_SDK",
            InstallErrorCode::InstallFailedNewerSdk => "INSTALL_FAILED_NEWER_SDK",
            InstallErrorCode::InstallFailedVersionDowngrade => "INSTALL_FAILED_VERSION_DOWNGRADE",
            InstallErrorCode::InstallFailedInsufficientStorage => {
                "INSTALL_FAILED_INSUFFICIENT_STORAGE"
            }
            InstallErrorCode::InstallFailedMediaUnavailable => "INSTALL_FAILED_MEDIA_UNAVAILABLE",
            InstallErrorCode::InstallFailedUserRestricted => "INSTALL_FAILED_USER_RESTRICTED",
            InstallErrorCode::InstallFailedVerificationFailure => {
                "INSTALL_FAILED_VERIFICATION_FAILURE"
            }
            InstallErrorCode::InstallParseFailedNotApk => "INSTALL_PARSE_FAILED_NOT_APK",
            InstallErrorCode::InstallParseFailedBadManifest => "INSTALL_PARSE_FAILED_BAD_MANIFEST",
            InstallErrorCode::InstallParseFailedNoCertificates => {
                "INSTALL_PARSE_FAILED_NO_CERTIFICATES"
            }
            InstallErrorCode::InstallParseFailedInconsistentCertificates => {
                "INSTALL_PARSE_FAILED_INCONSISTENT_CERTIFICATES"
            }
            InstallErrorCode::InstallFailedInvalidApk => "INSTALL_FAILED_INVALID_APK",
            InstallErrorCode::InstallFailedAborted => "INSTALL_FAILED_ABORTED",
            InstallErrorCode::InstallFailedNoMatchingAbis => "INSTALL_FAILED_NO_MATCHING_ABIS",
            InstallErrorCode::InstallFailedTestOnly => "INSTALL_FAILED_TEST_ONLY",
            InstallErrorCode::DeleteFailedInternalError => "DELETE_FAILED_INTERNAL_ERROR",
            InstallErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            InstallErrorCode::InstallFailedAlreadyExists => {
                "App already installed with different signature"
            }
            InstallErrorCode::InstallFailedUpdateIncompatible => {
                "Update incompatible with existing installation"
            }
            InstallErrorCode::InstallFailedDuplicatePackage => "Package already exists on device",
            InstallErrorCode::InstallFailedOlderSdk => {
                "Device Android version too old for this APK"
            }
            InstallErrorCode::InstallFailedNewerSdk => "APK requires older Android version",
            InstallErrorCode::InstallFailedVersionDowngrade => {
                "Cannot downgrade - use -d flag or uninstall first"
            }
            InstallErrorCode::InstallFailedInsufficientStorage => {
                "Not enough storage space on device"
            }
            InstallErrorCode::InstallFailedMediaUnavailable => "Storage media not available",
            InstallErrorCode::InstallFailedUserRestricted => "User restricted from installing apps",
            InstallErrorCode::InstallFailedVerificationFailure => "Package verification failed",
            InstallErrorCode::InstallParseFailedNotApk => "File is not a valid APK",
            InstallErrorCode::InstallParseFailedBadManifest => "Invalid AndroidManifest.xml in APK",
            InstallErrorCode::InstallParseFailedNoCertificates => "APK is not signed",
            InstallErrorCode::InstallParseFailedInconsistentCertificates => {
                "APK signature inconsistent with installed version"
            }
            InstallErrorCode::InstallFailedInvalidApk => "APK file is corrupted or invalid",
            InstallErrorCode::InstallFailedAborted => "Installation was aborted",
            InstallErrorCode::InstallFailedNoMatchingAbis => {
                "APK not compatible with device CPU architecture"
            }
            InstallErrorCode::InstallFailedTestOnly => "Test-only APK - use -t flag to install",
            InstallErrorCode::DeleteFailedInternalError => "Package could not be removed",
            InstallErrorCode::UnknownError => "Unknown installation error",
        }
    }

    /// Exact match on a package-manager status token.
    pub fn from_code(token: &str) -> Self {
        let token = token.trim();
        Self::KNOWN
            .into_iter()
            .find(|code| code.code().eq_ignore_ascii_case(token))
            .unwrap_or(InstallErrorCode::UnknownError)
    }
}

/// Bit set describing what changed on a device or client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChangeMask(u32);

impl ChangeMask {
    pub const NONE: ChangeMask = ChangeMask(0);
    // Device changes.
    pub const STATE: ChangeMask = ChangeMask(1);
    pub const CLIENT_LIST: ChangeMask = ChangeMask(1 << 1);
    pub const BUILD_INFO: ChangeMask = ChangeMask(1 << 2);
    // Client changes.
    pub const NAME: ChangeMask = ChangeMask(1 << 8);
    pub const DEBUGGER_STATUS: ChangeMask = ChangeMask(1 << 9);
    pub const PORT: ChangeMask = ChangeMask(1 << 10);
    pub const INFO: ChangeMask = ChangeMask(1 << 11);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: ChangeMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl BitOr for ChangeMask {
    type Output = ChangeMask;

    fn bitor(self, rhs: ChangeMask) -> ChangeMask {
        ChangeMask(self.0 | rhs.0)
    }
}
