use std::path::{Path, PathBuf};

use crate::app::config::AdbSettings;
use crate::app::error::DeviceError;

const SDK_ROOT_VARS: [&str; 2] = ["ANDROID_HOME", "ANDROID_SDK_ROOT"];

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

/// `platform-tools/adb` below an SDK root, if one is present on disk.
pub fn sdk_adb_path(sdk_root: &Path) -> Option<PathBuf> {
    let candidate = sdk_root.join("platform-tools").join(adb_file_name());
    candidate.is_file().then_some(candidate)
}

/// Configured path first, then an SDK from the environment, then `adb` on `PATH`.
pub fn resolve_adb_program(settings: &AdbSettings) -> String {
    let normalized = normalize_command_path(&settings.command_path);
    if !normalized.is_empty() {
        return normalized;
    }
    SDK_ROOT_VARS
        .iter()
        .filter_map(|var| std::env::var_os(var))
        .filter(|value| !value.is_empty())
        .find_map(|root| sdk_adb_path(Path::new(&root)))
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|| "adb".to_string())
}

pub fn validate_adb_program(program: &str) -> Result<(), DeviceError> {
    if program.trim().is_empty() {
        return Err(DeviceError::io("ADB command is empty"));
    }
    if program == "adb" {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(DeviceError::io("ADB path must point to an executable file"));
    }
    if !path.exists() {
        return Err(DeviceError::io(format!(
            "ADB executable not found at {program}"
        )));
    }
    Ok(())
}

pub fn locate_adb(settings: &AdbSettings) -> Result<String, DeviceError> {
    let program = resolve_adb_program(settings);
    validate_adb_program(&program)?;
    Ok(program)
}
