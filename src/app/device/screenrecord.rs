use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::adb::collaborators::{ShellService, ShellTimeouts};
use crate::app::adb::paths::quote_remote_path;
use crate::app::adb::receiver::OutputReceiver;
use crate::app::error::DeviceError;

use super::DeviceSession;

/// Options for the on-device `screenrecord` tool. Zero values keep the tool's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenRecorderOptions {
    pub width: u32,
    pub height: u32,
    pub bit_rate_mbps: u32,
    pub time_limit: Option<Duration>,
    pub show_touches: bool,
}

impl ScreenRecorderOptions {
    pub fn command(&self, remote_path: &str) -> String {
        let mut command = String::from("screenrecord");
        if self.width > 0 && self.height > 0 {
            command.push_str(&format!(" --size {}x{}", self.width, self.height));
        }
        if self.bit_rate_mbps > 0 {
            command.push_str(&format!(" --bit-rate {}", u64::from(self.bit_rate_mbps) * 1_000_000));
        }
        if let Some(limit) = self.time_limit.filter(|limit| limit.as_secs() > 0) {
            command.push_str(&format!(" --time-limit {}", limit.as_secs()));
        }
        if self.show_touches {
            command.push_str(" --show-touches");
        }
        command.push(' ');
        command.push_str(&quote_remote_path(remote_path));
        command
    }
}

impl DeviceSession {
    /// Records the screen into `remote_path`. Blocks until the recording stops.
    pub fn start_screen_recorder(
        &self,
        remote_path: &str,
        options: &ScreenRecorderOptions,
        receiver: &mut dyn OutputReceiver,
    ) -> Result<(), DeviceError> {
        info!(serial = %self.serial, remote = remote_path, "starting screen recorder");
        self.dispatch(
            ShellService::Shell,
            options.command(remote_path),
            ShellTimeouts::unbounded(),
            None,
            receiver,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_only_name_the_output() {
        assert_eq!(
            ScreenRecorderOptions::default().command("/sdcard/demo.mp4"),
            "screenrecord '/sdcard/demo.mp4'"
        );
    }

    #[test]
    fn all_options_are_rendered() {
        let options = ScreenRecorderOptions {
            width: 1280,
            height: 720,
            bit_rate_mbps: 4,
            time_limit: Some(Duration::from_secs(30)),
            show_touches: true,
        };
        assert_eq!(
            options.command("/sdcard/demo.mp4"),
            "screenrecord --size 1280x720 --bit-rate 4000000 --time-limit 30 --show-touches '/sdcard/demo.mp4'"
        );
    }

    #[test]
    fn partial_size_is_ignored() {
        let options = ScreenRecorderOptions {
            width: 1280,
            ..ScreenRecorderOptions::default()
        };
        assert!(!options.command("/sdcard/a.mp4").contains("--size"));
    }
}
