use std::io::Read;
use std::time::Duration;

use tracing::debug;

use crate::app::adb::collaborators::{ShellRequest, ShellService, ShellTimeouts};
use crate::app::adb::receiver::{CollectingReceiver, OutputReceiver};
use crate::app::error::DeviceError;
use crate::app::models::Feature;

use super::DeviceSession;

impl DeviceSession {
    /// Runs `command` with the configured time-to-first-output budget and no
    /// overall bound.
    pub fn execute_shell_command(
        &self,
        command: &str,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceError> {
        self.execute_shell_command_with_response_timeout(
            command,
            receiver,
            self.config.timeouts.shell_response(),
        )
    }

    pub fn execute_shell_command_with_response_timeout(
        &self,
        command: &str,
        receiver: &mut dyn OutputReceiver,
        max_time_to_first_response: Duration,
    ) -> Result<(), DeviceError> {
        self.dispatch(
            ShellService::Shell,
            command.to_string(),
            ShellTimeouts::first_response(max_time_to_first_response),
            None,
            receiver,
        )
    }

    pub fn execute_shell_command_with_timeouts(
        &self,
        command: &str,
        receiver: &mut dyn OutputReceiver,
        max_timeout: Duration,
        max_time_to_first_response: Duration,
    ) -> Result<(), DeviceError> {
        self.dispatch(
            ShellService::Shell,
            command.to_string(),
            ShellTimeouts::bounded(max_timeout, max_time_to_first_response),
            None,
            receiver,
        )
    }

    /// Pipes `input` into the remote command's stdin through the exec service.
    pub fn execute_shell_command_with_input(
        &self,
        command: &str,
        receiver: &mut dyn OutputReceiver,
        max_timeout: Duration,
        max_time_to_first_response: Duration,
        input: &mut dyn Read,
    ) -> Result<(), DeviceError> {
        self.dispatch(
            ShellService::Exec,
            command.to_string(),
            ShellTimeouts::bounded(max_timeout, max_time_to_first_response),
            Some(input),
            receiver,
        )
    }

    /// Invokes a system service through binder.
    ///
    /// Uses the `abb_exec` service when both ends support it. Otherwise falls back
    /// to `cmd` with space-joined arguments, which cannot preserve arguments that
    /// contain spaces.
    pub fn execute_binder_command(
        &self,
        args: &[&str],
        receiver: &mut dyn OutputReceiver,
        max_time_to_first_response: Duration,
        input: Option<&mut dyn Read>,
    ) -> Result<(), DeviceError> {
        let timeouts = ShellTimeouts::first_response(max_time_to_first_response);
        if self.supports_feature(Feature::AbbExec) {
            return self.dispatch(ShellService::AbbExec, args.join("\0"), timeouts, input, receiver);
        }
        let command = format!("cmd {}", args.join(" "));
        let service = if input.is_some() {
            ShellService::Exec
        } else {
            ShellService::Shell
        };
        self.dispatch(service, command, timeouts, input, receiver)
    }

    pub(super) fn dispatch(
        &self,
        service: ShellService,
        command: String,
        timeouts: ShellTimeouts,
        input: Option<&mut dyn Read>,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceError> {
        let request = ShellRequest {
            service,
            command,
            timeouts,
            input,
        };
        self.collaborators
            .transport
            .execute(&self.serial, request, receiver)
            .inspect_err(|err| {
                debug!(serial = %self.serial, service = ?service, error = %err, "device command failed");
            })
    }

    /// Runs a shell command and returns everything it printed.
    pub(super) fn capture_shell(
        &self,
        command: &str,
        timeouts: ShellTimeouts,
    ) -> Result<String, DeviceError> {
        let mut receiver = CollectingReceiver::new();
        self.dispatch(
            ShellService::Shell,
            command.to_string(),
            timeouts,
            None,
            &mut receiver,
        )?;
        Ok(receiver.output())
    }
}
