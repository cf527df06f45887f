use std::path::Path;

use tracing::{debug, info};

use crate::app::adb::collaborators::{NullSyncProgress, SyncProgress, SyncSession};
use crate::app::adb::paths::remote_staging_path;
use crate::app::error::DeviceError;

use super::DeviceSession;

/// Closes the sync session on every exit path.
struct SyncGuard {
    session: Box<dyn SyncSession>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.session.close();
    }
}

impl DeviceSession {
    fn open_sync(&self, direction: &str) -> Result<SyncGuard, DeviceError> {
        match self.collaborators.sync.open(&self.serial)? {
            Some(session) => Ok(SyncGuard { session }),
            None => Err(DeviceError::io(format!(
                "Unable to open sync connection to {direction} file"
            ))),
        }
    }

    pub fn push_file(&self, local: &Path, remote: &str) -> Result<(), DeviceError> {
        self.push_file_with_progress(local, remote, &mut NullSyncProgress)
    }

    pub fn push_file_with_progress(
        &self,
        local: &Path,
        remote: &str,
        progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError> {
        let mut guard = self.open_sync("push")?;
        debug!(serial = %self.serial, local = %local.display(), remote, "pushing file");
        guard.session.push(local, remote, progress)
    }

    pub fn pull_file(&self, remote: &str, local: &Path) -> Result<(), DeviceError> {
        self.pull_file_with_progress(remote, local, &mut NullSyncProgress)
    }

    pub fn pull_file_with_progress(
        &self,
        remote: &str,
        local: &Path,
        progress: &mut dyn SyncProgress,
    ) -> Result<(), DeviceError> {
        let mut guard = self.open_sync("pull")?;
        debug!(serial = %self.serial, remote, local = %local.display(), "pulling file");
        guard.session.pull(remote, local, progress)
    }

    /// Uploads a package into the staging directory and returns its remote path.
    pub fn sync_package_to_device(&self, local: &Path) -> Result<String, DeviceError> {
        let remote = remote_staging_path(&self.config.install.staging_dir, local)?;
        info!(serial = %self.serial, local = %local.display(), remote = %remote, "uploading package");
        self.push_file(local, &remote)?;
        Ok(remote)
    }
}
