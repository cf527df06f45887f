use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::collaborators::ShellTimeouts;
use crate::app::adb::parse::parse_install_output;
use crate::app::adb::paths::quote_remote_path;
use crate::app::error::DeviceError;
use crate::app::models::{InstallErrorCode, InstallMetrics};

use super::DeviceSession;

fn install_command(remote: &str, reinstall: bool, extra_args: &[String]) -> String {
    let mut parts = vec!["pm".to_string(), "install".to_string()];
    if reinstall {
        parts.push("-r".to_string());
    }
    parts.extend(
        extra_args
            .iter()
            .map(|arg| arg.trim())
            .filter(|arg| !arg.is_empty())
            .map(str::to_string),
    );
    parts.push(quote_remote_path(remote));
    parts.join(" ")
}

/// Dot-separated segments of letters, digits and `_`, at least two of them.
fn is_valid_package_name(name: &str) -> bool {
    let segments: Vec<&str> = name.split('.').collect();
    segments.len() >= 2
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        })
}

struct StagedInstall<'a> {
    remote: &'a str,
    reinstall: bool,
    extra_args: &'a [String],
    upload_started: Instant,
    upload_finished: Instant,
    remove_after: bool,
    trace_id: &'a str,
}

impl DeviceSession {
    /// Uploads `local` into the staging directory, installs it with the package
    /// manager and removes the staged copy.
    pub fn install_package(
        &self,
        local: &Path,
        reinstall: bool,
        extra_args: &[String],
    ) -> Result<(), DeviceError> {
        let trace_id = Uuid::new_v4().to_string();
        info!(
            trace_id = %trace_id,
            serial = %self.serial,
            package = %local.display(),
            reinstall,
            "installing package"
        );
        let upload_started = Instant::now();
        let remote = self
            .sync_package_to_device(local)
            .map_err(DeviceError::into_install_failure)?;
        let upload_finished = Instant::now();
        self.install_staged(StagedInstall {
            remote: &remote,
            reinstall,
            extra_args,
            upload_started,
            upload_finished,
            remove_after: true,
            trace_id: &trace_id,
        })
    }

    /// Installs a package that is already on the device. The file is left in place.
    pub fn install_remote_package(
        &self,
        remote: &str,
        reinstall: bool,
        extra_args: &[String],
    ) -> Result<(), DeviceError> {
        let trace_id = Uuid::new_v4().to_string();
        info!(trace_id = %trace_id, serial = %self.serial, remote, reinstall, "installing staged package");
        let now = Instant::now();
        self.install_staged(StagedInstall {
            remote,
            reinstall,
            extra_args,
            upload_started: now,
            upload_finished: now,
            remove_after: false,
            trace_id: &trace_id,
        })
    }

    fn install_staged(&self, install: StagedInstall<'_>) -> Result<(), DeviceError> {
        let command = install_command(install.remote, install.reinstall, install.extra_args);
        let output = self.capture_shell(
            &command,
            ShellTimeouts::first_response(self.config.timeouts.install()),
        );
        let install_finished = Instant::now();

        let cleanup = install
            .remove_after
            .then(|| self.remove_remote_package(install.remote));

        self.record_install_metrics(InstallMetrics::new(
            install.upload_started,
            install.upload_finished,
            install_finished,
        ));

        let failure = match output {
            Err(err) => Some(err.into_install_failure()),
            Ok(output) => parse_install_output(&output).map(|detail| {
                let known = detail.code.as_deref().map(InstallErrorCode::from_code);
                warn!(
                    trace_id = %install.trace_id,
                    serial = %self.serial,
                    code = ?detail.code,
                    hint = known.map(|code| code.description()).unwrap_or(""),
                    "package manager reported failure"
                );
                DeviceError::install(detail.message, detail.code)
            }),
        };

        match (failure, cleanup) {
            (Some(err), Some(Err(cleanup_err))) => {
                warn!(trace_id = %install.trace_id, error = %cleanup_err, "failed to remove staged package");
                Err(err)
            }
            (Some(err), _) => Err(err),
            (None, Some(Err(cleanup_err))) => Err(cleanup_err),
            (None, _) => {
                info!(trace_id = %install.trace_id, serial = %self.serial, "package installed");
                Ok(())
            }
        }
    }

    /// `Ok(None)` on success; a failure reported by the package manager comes
    /// back as `Ok(Some(message))`.
    pub fn uninstall_package(&self, package: &str) -> Result<Option<String>, DeviceError> {
        if !is_valid_package_name(package) {
            return Err(DeviceError::install(
                format!("Invalid package name: {package:?}"),
                None,
            ));
        }
        let output = self
            .capture_shell(
                &format!("pm uninstall {package}"),
                ShellTimeouts::first_response(self.config.timeouts.install()),
            )
            .map_err(DeviceError::into_install_failure)?;
        let failure = parse_install_output(&output).map(|detail| detail.message);
        if let Some(message) = &failure {
            warn!(serial = %self.serial, package, message = %message, "uninstall failed");
        }
        Ok(failure)
    }

    pub fn remove_remote_package(&self, remote: &str) -> Result<(), DeviceError> {
        self.capture_shell(
            &format!("rm {}", quote_remote_path(remote)),
            ShellTimeouts::first_response(self.config.timeouts.install()),
        )
        .map(|_| ())
        .map_err(DeviceError::into_install_failure)
    }

    /// Multi-APK install through the split installer.
    pub fn install_packages(
        &self,
        locals: &[PathBuf],
        reinstall: bool,
        options: &[String],
    ) -> Result<(), DeviceError> {
        let metrics = self
            .collaborators
            .split_installer
            .install(self, locals, reinstall, options, self.config.timeouts.install())
            .map_err(DeviceError::into_install_failure)?;
        self.record_install_metrics(metrics);
        Ok(())
    }

    pub fn install_remote_packages(
        &self,
        remotes: &[String],
        reinstall: bool,
        options: &[String],
    ) -> Result<(), DeviceError> {
        let metrics = self
            .collaborators
            .split_installer
            .install_remote(self, remotes, reinstall, options, self.config.timeouts.install())
            .map_err(DeviceError::into_install_failure)?;
        self.record_install_metrics(metrics);
        Ok(())
    }
}
