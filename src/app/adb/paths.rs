use std::path::Path;

use crate::app::error::DeviceError;

pub fn validate_remote_path(path: &str) -> Result<(), DeviceError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(DeviceError::io("remote path is required"));
    }
    if !trimmed.starts_with('/') {
        return Err(DeviceError::io(
            "remote path must be an absolute device path starting with '/'",
        ));
    }
    if trimmed.contains('\0') || trimmed.contains('"') {
        return Err(DeviceError::io("remote path contains invalid characters"));
    }
    if trimmed == "/" {
        return Err(DeviceError::io("remote path must not be root"));
    }
    if trimmed.split('/').any(|segment| segment == "..") {
        return Err(DeviceError::io("remote path must not contain '..' segments"));
    }
    Ok(())
}

/// `<staging_dir>/<file name of local>`.
pub fn remote_staging_path(staging_dir: &str, local: &Path) -> Result<String, DeviceError> {
    let file_name = local
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            DeviceError::io(format!("{} has no file name", local.display()))
        })?;
    let dir = staging_dir.trim().trim_end_matches('/');
    let remote = format!("{dir}/{file_name}");
    validate_remote_path(&remote)?;
    Ok(remote)
}

/// Single-quotes a remote path so the device shell expands nothing in it.
pub fn quote_remote_path(path: &str) -> String {
    format!("'{}'", path.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn validate_remote_path_requires_absolute() {
        assert!(validate_remote_path("").is_err());
        assert!(validate_remote_path("sdcard/file.txt").is_err());
        assert!(validate_remote_path("/").is_err());
        assert!(validate_remote_path("/sdcard/file.txt").is_ok());
    }

    #[test]
    fn validate_remote_path_blocks_dotdot() {
        assert!(validate_remote_path("/sdcard/../etc/passwd").is_err());
        assert!(validate_remote_path("/sdcard/..").is_err());
        assert!(validate_remote_path("/data/local/tmp/a\"b").is_err());
    }

    #[test]
    fn staging_path_uses_local_file_name() {
        let local = PathBuf::from("/home/dev/build/app-debug.apk");
        assert_eq!(
            remote_staging_path("/data/local/tmp/", &local).expect("path"),
            "/data/local/tmp/app-debug.apk"
        );
        assert!(remote_staging_path("/data/local/tmp", Path::new("/")).is_err());
    }

    #[test]
    fn quotes_for_shell() {
        assert_eq!(
            quote_remote_path("/data/local/tmp/my app.apk"),
            "'/data/local/tmp/my app.apk'"
        );
    }

    #[test]
    fn quoting_keeps_shell_metacharacters_literal() {
        assert_eq!(
            quote_remote_path("/data/local/tmp/app$1`id`.apk"),
            "'/data/local/tmp/app$1`id`.apk'"
        );
        assert_eq!(
            quote_remote_path("/sdcard/it's.mp4"),
            "'/sdcard/it'\\''s.mp4'"
        );
    }
}
