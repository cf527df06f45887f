//! Contracts the device session consumes from the layers around it.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::adb::pending::Pending;
use crate::app::adb::receiver::OutputReceiver;
use crate::app::device::{Client, DeviceSession};
use crate::app::error::DeviceError;
use crate::app::models::{ChangeMask, InstallMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellService {
    Shell,
    /// Raw exec channel; stdin of the remote command is connected.
    Exec,
    /// Binder exec; arguments are NUL-separated.
    AbbExec,
}

/// `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShellTimeouts {
    pub max_timeout: Option<Duration>,
    pub max_time_to_first_response: Option<Duration>,
}

impl ShellTimeouts {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn first_response(max_time_to_first_response: Duration) -> Self {
        Self {
            max_timeout: None,
            max_time_to_first_response: Some(max_time_to_first_response),
        }
    }

    pub fn bounded(max_timeout: Duration, max_time_to_first_response: Duration) -> Self {
        Self {
            max_timeout: Some(max_timeout),
            max_time_to_first_response: Some(max_time_to_first_response),
        }
    }
}

pub struct ShellRequest<'a> {
    pub service: ShellService,
    pub command: String,
    pub timeouts: ShellTimeouts,
    pub input: Option<&'a mut dyn Read>,
}

pub trait Transport: Send + Sync {
    /// Runs `request` on the device and streams its output into `receiver`.
    fn execute(
        &self,
        serial: &str,
        request: ShellRequest<'_>,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceError>;

    /// Comma-separated feature tokens advertised by the device.
    fn device_features(&self, serial: &str) -> Result<String, DeviceError>;

    /// Comma-separated feature tokens supported by the host daemon.
    fn host_features(&self) -> Result<String, DeviceError>;
}

pub trait SyncProgress {
    fn start(&mut self, _total_work: u64) {}
    fn advance(&mut self, _work: u64) {}
    fn stop(&mut self) {}
    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NullSyncProgress;

impl SyncProgress for NullSyncProgress {}

pub trait SyncSession: Send {
    fn push(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError>;

    fn pull(
        &mut self,
        remote: &str,
        local: &Path,
        progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError>;

    fn close(&mut self);
}

pub trait SyncConnector: Send + Sync {
    /// `Ok(None)` when the daemon would not hand out a sync connection.
    fn open(&self, serial: &str) -> Result<Option<Box<dyn SyncSession>>, DeviceError>;
}

pub trait PropertyFetcher: Send + Sync {
    fn property(&self, name: &str) -> Pending<Option<String>>;

    fn has_cached_properties(&self) -> bool;

    fn cached_property(&self, _name: &str) -> Option<String> {
        None
    }

    fn cached_properties(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

pub trait BatteryFetcher: Send + Sync {
    /// Level in percent, reusing a reading younger than `freshness`.
    fn battery(&self, freshness: Duration) -> Pending<Option<u8>>;
}

pub trait ChangeBroadcaster: Send + Sync {
    fn notify_device_changed(&self, session: &DeviceSession, mask: ChangeMask);
    fn notify_client_changed(&self, client: &Client, mask: ChangeMask);
}

pub trait DisconnectionTracker: Send + Sync {
    fn on_client_disconnected(&self, client: &Client);
}

pub trait SplitInstaller: Send + Sync {
    fn install(
        &self,
        session: &DeviceSession,
        artifacts: &[PathBuf],
        reinstall: bool,
        options: &[String],
        timeout: Duration,
    ) -> Result<InstallMetrics, DeviceError>;

    fn install_remote(
        &self,
        session: &DeviceSession,
        remote_artifacts: &[String],
        reinstall: bool,
        options: &[String],
        timeout: Duration,
    ) -> Result<InstallMetrics, DeviceError>;
}

#[derive(Debug, Default)]
pub struct NoopBroadcaster;

impl ChangeBroadcaster for NoopBroadcaster {
    fn notify_device_changed(&self, _session: &DeviceSession, _mask: ChangeMask) {}
    fn notify_client_changed(&self, _client: &Client, _mask: ChangeMask) {}
}

#[derive(Debug, Default)]
pub struct NoopDisconnectionTracker;

impl DisconnectionTracker for NoopDisconnectionTracker {
    fn on_client_disconnected(&self, _client: &Client) {}
}

/// Split installer for embedders without multi-APK support.
#[derive(Debug, Default)]
pub struct UnsupportedSplitInstaller;

impl SplitInstaller for UnsupportedSplitInstaller {
    fn install(
        &self,
        _session: &DeviceSession,
        _artifacts: &[PathBuf],
        _reinstall: bool,
        _options: &[String],
        _timeout: Duration,
    ) -> Result<InstallMetrics, DeviceError> {
        Err(DeviceError::install("Multi-APK install is not available", None))
    }

    fn install_remote(
        &self,
        _session: &DeviceSession,
        _remote_artifacts: &[String],
        _reinstall: bool,
        _options: &[String],
        _timeout: Duration,
    ) -> Result<InstallMetrics, DeviceError> {
        Err(DeviceError::install("Multi-APK install is not available", None))
    }
}
