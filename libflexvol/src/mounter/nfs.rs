//! NFS executor (`softlayer-nfs`, `spectrum-scale-nfs`).
//!
//! Shares are mounted under `<mount_root>/<share>` and stay mounted after the
//! pod goes away: the filesystem unmount flow only detaches on the control
//! plane.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{Mounter, config_str};
use crate::error::{FlexError, FlexResult};
use crate::exec;
use crate::types::VolumeConfig;

/// Volume config attribute holding the `server:/export` share.
pub const CONFIG_NFS_SHARE: &str = "nfs_share";

#[derive(Debug, Clone)]
pub struct NfsMounter {
    mount_root: PathBuf,
    timeout: Option<Duration>,
}

impl NfsMounter {
    pub fn new(mount_root: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            mount_root,
            timeout,
        }
    }

    /// Local mount location of `share`.
    pub fn share_mountpoint(&self, share: &str) -> PathBuf {
        self.mount_root.join(share.trim_start_matches('/'))
    }
}

#[async_trait]
impl Mounter for NfsMounter {
    #[instrument(skip(self, config))]
    async fn mount(&self, _mountpoint: &Path, config: &VolumeConfig) -> FlexResult<PathBuf> {
        let share = config_str(config, CONFIG_NFS_SHARE, "Mount")?;
        let target = self.share_mountpoint(share);

        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| FlexError::io("create mountpoint", &target, e))?;

        if exec::is_mountpoint(&target).await {
            debug!(target = %target.display(), "share already mounted");
            return Ok(target);
        }

        let args = [
            std::ffi::OsStr::new("-t"),
            std::ffi::OsStr::new("nfs"),
            std::ffi::OsStr::new(share),
            target.as_os_str(),
        ];
        exec::run("mount", &args, self.timeout).await?;
        info!(%share, target = %target.display(), "nfs share mounted");
        Ok(target)
    }

    async fn unmount(&self, _config: &VolumeConfig) -> FlexResult<()> {
        Ok(())
    }

    async fn action_after_detach(&self, _config: &VolumeConfig) -> FlexResult<()> {
        Ok(())
    }
}
