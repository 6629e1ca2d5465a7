//! Block volume executor (SCBE backend).
//!
//! The control plane maps the LUN to the host on attach; this executor then
//! makes the multipath device visible, puts a filesystem on it the first time
//! around and mounts it under the block mount template.
//!
//! # Host layout
//!
//! ```text
//! /dev/mapper/3<wwn>     # multipath device, WWID naming
//! /ubiquity/<wwn>        # mountpoint (from the block mount template)
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{Mounter, config_str};
use crate::error::{FlexError, FlexResult};
use crate::exec;
use crate::paths::BlockMountTemplate;
use crate::types::VolumeConfig;

/// Volume config attribute holding the LUN WWN.
pub const CONFIG_WWN: &str = "wwn";
/// Volume config attribute selecting the filesystem type.
pub const CONFIG_FSTYPE: &str = "fstype";
pub const DEFAULT_FSTYPE: &str = "ext4";

const MULTIPATH_DIR: &str = "/dev/mapper";
const WWID_PREFIX: &str = "3";

/// Executor for volumes backed by multipath block devices.
#[derive(Debug, Clone)]
pub struct BlockDeviceMounter {
    template: BlockMountTemplate,
    skip_rescan: bool,
    timeout: Option<Duration>,
}

impl BlockDeviceMounter {
    pub fn new(template: BlockMountTemplate, skip_rescan: bool, timeout: Option<Duration>) -> Self {
        Self {
            template,
            skip_rescan,
            timeout,
        }
    }

    /// Rescan iSCSI sessions and reload multipath maps.
    async fn rescan(&self) -> FlexResult<()> {
        if self.skip_rescan {
            debug!("skipping iscsi rescan");
            return Ok(());
        }
        // No logged-in sessions is not fatal: FC hosts have none.
        if let Err(e) = exec::run("iscsiadm", &["-m", "session", "--rescan"], self.timeout).await {
            warn!(error = %e, "iscsi rescan failed");
        }
        exec::run("multipath", &["-r"], self.timeout).await?;
        Ok(())
    }

    /// `true` when blkid finds a filesystem signature on the device.
    async fn has_filesystem(&self, device: &Path) -> FlexResult<bool> {
        let args = ["-o", "value", "-s", "TYPE", path_str(device)?];
        let out = exec::output("blkid", &args, self.timeout).await?;
        Ok(out.status.success() && !out.stdout.trim().is_empty())
    }
}

/// Multipath device node for a WWN.
pub fn device_path(wwn: &str) -> PathBuf {
    Path::new(MULTIPATH_DIR).join(format!("{WWID_PREFIX}{}", wwn.to_ascii_lowercase()))
}

fn path_str(path: &Path) -> FlexResult<&str> {
    path.to_str()
        .ok_or_else(|| FlexError::mounter("Mount", format!("non-UTF8 path {}", path.display())))
}

#[async_trait]
impl Mounter for BlockDeviceMounter {
    #[instrument(skip(self, config))]
    async fn mount(&self, mountpoint: &Path, config: &VolumeConfig) -> FlexResult<PathBuf> {
        let wwn = config_str(config, CONFIG_WWN, "Mount")?;
        let fstype = config
            .get(CONFIG_FSTYPE)
            .and_then(serde_json::Value::as_str)
            .unwrap_or(DEFAULT_FSTYPE);

        self.rescan().await?;

        let device = device_path(wwn);
        tokio::fs::metadata(&device).await.map_err(|e| {
            FlexError::mounter("Mount", format!("device {} not found: {e}", device.display()))
        })?;

        if !self.has_filesystem(&device).await? {
            info!(device = %device.display(), %fstype, "creating filesystem");
            exec::run("mkfs", &["-t", fstype, path_str(&device)?], self.timeout).await?;
        }

        tokio::fs::create_dir_all(mountpoint)
            .await
            .map_err(|e| FlexError::io("create mountpoint", mountpoint, e))?;

        if exec::is_mountpoint(mountpoint).await {
            debug!(mountpoint = %mountpoint.display(), "already mounted");
        } else {
            let args = ["-t", fstype, path_str(&device)?, path_str(mountpoint)?];
            exec::run("mount", &args, self.timeout).await?;
            info!(device = %device.display(), mountpoint = %mountpoint.display(), "block volume mounted");
        }
        Ok(mountpoint.to_path_buf())
    }

    #[instrument(skip(self, config))]
    async fn unmount(&self, config: &VolumeConfig) -> FlexResult<()> {
        let wwn = config_str(config, CONFIG_WWN, "Unmount")?;
        let mountpoint = self.template.render(wwn);

        if exec::is_mountpoint(&mountpoint).await {
            exec::run("umount", &[path_str(&mountpoint)?], self.timeout).await?;
        } else {
            debug!(mountpoint = %mountpoint.display(), "not mounted, nothing to umount");
        }

        match tokio::fs::remove_dir(&mountpoint).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(FlexError::io("remove mountpoint", &mountpoint, e)),
        }

        let device = device_path(wwn);
        if tokio::fs::symlink_metadata(&device).await.is_ok() {
            exec::run("multipath", &["-f", path_str(&device)?], self.timeout).await?;
        }

        info!(mountpoint = %mountpoint.display(), "block volume unmounted");
        Ok(())
    }

    async fn action_after_detach(&self, _config: &VolumeConfig) -> FlexResult<()> {
        self.rescan().await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn device_path_uses_wwid_naming() {
        assert_eq!(
            device_path("6005076810810261F800000000000A1B"),
            PathBuf::from("/dev/mapper/36005076810810261f800000000000a1b")
        );
    }

    #[tokio::test]
    async fn mount_requires_wwn() {
        let mounter = BlockDeviceMounter::new(
            BlockMountTemplate::new("/ubiquity/{wwn}").unwrap(),
            true,
            None,
        );
        let err = mounter
            .mount(Path::new("/ubiquity/x"), &VolumeConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlexError::Mounter { .. }));
    }

    #[tokio::test]
    async fn unmount_of_absent_volume_is_clean() {
        let tmp = tempfile::tempdir().unwrap();
        let template = format!("{}/{{wwn}}", tmp.path().display());
        let mounter = BlockDeviceMounter::new(BlockMountTemplate::new(template).unwrap(), true, None);

        let config = json!({"wwn": "deadbeef"}).as_object().cloned().unwrap();
        std::fs::create_dir(tmp.path().join("deadbeef")).unwrap();

        mounter.unmount(&config).await.unwrap();
        assert!(!tmp.path().join("deadbeef").exists());
    }

    #[tokio::test]
    async fn after_detach_without_rescan_is_noop() {
        let mounter = BlockDeviceMounter::new(
            BlockMountTemplate::new("/ubiquity/{wwn}").unwrap(),
            true,
            None,
        );
        mounter
            .action_after_detach(&VolumeConfig::new())
            .await
            .unwrap();
    }
}
