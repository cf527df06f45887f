//! Collaborators that drive the host `adb` executable as a child process.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::adb::collaborators::{
    ShellRequest, ShellService, ShellTimeouts, SyncConnector, SyncProgress, SyncSession, Transport,
};
use crate::app::adb::locator::locate_adb;
use crate::app::adb::receiver::OutputReceiver;
use crate::app::adb::runner::{run_command_with_limits, run_command_with_timeout, CommandOutput};
use crate::app::adb::transfer::PercentProgress;
use crate::app::config::AdbSettings;
use crate::app::error::{DeviceError, ErrorKind};

const FEATURES_TIMEOUT: Duration = Duration::from_secs(10);

/// adb client errors that mean the daemon refused to talk to the device.
const REJECTION_MARKERS: [&str; 6] = [
    "device offline",
    "unauthorized",
    "not found",
    "no devices",
    "no emulators",
    "more than one device",
];

fn adb_error_line(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).find(|line| {
        let lower = line.to_lowercase();
        lower.starts_with("error:") || lower.starts_with("adb: error:")
    })
}

/// Maps a failed adb invocation onto the error taxonomy. `None` means the
/// failure belongs to the remote command, not to adb itself.
fn classify_failure(output: &CommandOutput) -> Option<DeviceError> {
    if output.success() {
        return None;
    }
    let line = adb_error_line(&output.stderr)?;
    let lower = line.to_lowercase();
    if REJECTION_MARKERS.iter().any(|marker| lower.contains(marker)) {
        Some(DeviceError::rejected(line))
    } else {
        Some(DeviceError::io(line))
    }
}

fn device_args(serial: &str, rest: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut args = vec!["-s".to_string(), serial.to_string()];
    args.extend(rest);
    args
}

/// adb client arguments for one request. `exec-out` never forwards the host's
/// stdin, so requests carrying input go through `shell`, which does when stdin
/// is not a terminal.
fn request_args(serial: &str, service: ShellService, command: String, has_input: bool) -> Vec<String> {
    match service {
        ShellService::Shell => device_args(serial, ["shell".to_string(), command]),
        ShellService::Exec if has_input => device_args(serial, ["shell".to_string(), command]),
        ShellService::Exec => device_args(serial, ["exec-out".to_string(), command]),
        ShellService::AbbExec => device_args(
            serial,
            std::iter::once("abb".to_string()).chain(command.split('\0').map(str::to_string)),
        ),
    }
}

#[derive(Debug, Clone)]
pub struct AdbCliTransport {
    program: String,
}

impl AdbCliTransport {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_settings(settings: &AdbSettings) -> Result<Self, DeviceError> {
        Ok(Self::new(locate_adb(settings)?))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn query(&self, args: Vec<String>) -> Result<String, DeviceError> {
        let output = run_command_with_timeout(&self.program, &args, FEATURES_TIMEOUT)?;
        if let Some(err) = classify_failure(&output) {
            return Err(err);
        }
        if !output.success() {
            return Err(DeviceError::io(format!(
                "adb {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout_text())
    }
}

impl Transport for AdbCliTransport {
    fn execute(
        &self,
        serial: &str,
        request: ShellRequest<'_>,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceError> {
        let args = request_args(
            serial,
            request.service,
            request.command,
            request.input.is_some(),
        );
        debug!(serial = %serial, service = ?request.service, "running adb command");
        let output = run_command_with_limits(&self.program, &args, request.timeouts, request.input)?;
        if let Some(err) = classify_failure(&output) {
            warn!(serial = %serial, error = %err, "adb refused command");
            return Err(err);
        }
        // Device-side stderr is part of the command's output.
        receiver.add_output(&output.stdout);
        if !output.stderr.is_empty() {
            receiver.add_output(output.stderr.as_bytes());
        }
        receiver.flush();
        Ok(())
    }

    fn device_features(&self, serial: &str) -> Result<String, DeviceError> {
        self.query(device_args(serial, ["features".to_string()]))
    }

    fn host_features(&self) -> Result<String, DeviceError> {
        self.query(vec!["host-features".to_string()])
    }
}

/// Opens `adb push`/`adb pull` backed sync sessions.
#[derive(Debug, Clone)]
pub struct AdbCliSync {
    program: String,
}

impl AdbCliSync {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SyncConnector for AdbCliSync {
    fn open(&self, serial: &str) -> Result<Option<Box<dyn SyncSession>>, DeviceError> {
        Ok(Some(Box::new(AdbCliSyncSession {
            program: self.program.clone(),
            serial: serial.to_string(),
            closed: false,
        })))
    }
}

struct AdbCliSyncSession {
    program: String,
    serial: String,
    closed: bool,
}

impl AdbCliSyncSession {
    fn transfer(
        &self,
        direction: &str,
        source: String,
        destination: String,
        progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::sync("Sync session already closed"));
        }
        if progress.is_cancelled() {
            return Err(DeviceError::sync(format!("{direction} cancelled")));
        }
        let args = device_args(
            &self.serial,
            [direction.to_string(), "-p".to_string(), source, destination],
        );
        let output = run_command_with_limits(&self.program, &args, ShellTimeouts::unbounded(), None)?;

        let mut tracker = PercentProgress::new(progress);
        for line in output.stdout_text().split(['\r', '\n']) {
            tracker.feed_line(line);
        }
        tracker.finish();

        if let Some(err) = classify_failure(&output) {
            if err.is(ErrorKind::CommandRejected) {
                return Err(err);
            }
        }
        if !output.success() {
            let detail = output.stderr.trim();
            return Err(DeviceError::sync(if detail.is_empty() {
                format!("adb {direction} failed")
            } else {
                format!("adb {direction} failed: {detail}")
            }));
        }
        Ok(())
    }
}

impl SyncSession for AdbCliSyncSession {
    fn push(
        &mut self,
        local: &Path,
        remote: &str,
        progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError> {
        self.transfer(
            "push",
            local.to_string_lossy().to_string(),
            remote.to_string(),
            progress,
        )
    }

    fn pull(
        &mut self,
        remote: &str,
        local: &Path,
        progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError> {
        self.transfer(
            "pull",
            remote.to_string(),
            local.to_string_lossy().to_string(),
            progress,
        )
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
