//! Spectrum Scale executor.
//!
//! The cluster filesystem is mounted on every node already and the control
//! plane links the fileset on attach, so mounting is only a lookup of where
//! the fileset lives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{Mounter, config_str};
use crate::error::{FlexError, FlexResult};
use crate::types::VolumeConfig;

/// Volume config attribute holding the linked fileset path.
pub const CONFIG_MOUNTPOINT: &str = "mountpoint";

#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleMounter;

#[async_trait]
impl Mounter for ScaleMounter {
    async fn mount(&self, _mountpoint: &Path, config: &VolumeConfig) -> FlexResult<PathBuf> {
        let fileset = PathBuf::from(config_str(config, CONFIG_MOUNTPOINT, "Mount")?);
        if tokio::fs::metadata(&fileset).await.is_err() {
            return Err(FlexError::mounter(
                "Mount",
                format!("fileset path {} is not linked", fileset.display()),
            ));
        }
        debug!(fileset = %fileset.display(), "fileset available");
        Ok(fileset)
    }

    async fn unmount(&self, _config: &VolumeConfig) -> FlexResult<()> {
        Ok(())
    }

    async fn action_after_detach(&self, _config: &VolumeConfig) -> FlexResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn mount_returns_linked_fileset() {
        let tmp = tempfile::tempdir().unwrap();
        let fileset = tmp.path().join("pvc-1");
        std::fs::create_dir(&fileset).unwrap();

        let config = json!({"mountpoint": fileset.to_str().unwrap()})
            .as_object()
            .cloned()
            .unwrap();
        let mounted = ScaleMounter
            .mount(Path::new("/ubiquity/ignored"), &config)
            .await
            .unwrap();
        assert_eq!(mounted, fileset);
    }

    #[tokio::test]
    async fn unlinked_fileset_fails() {
        let config = json!({"mountpoint": "/gpfs/definitely/not/linked"})
            .as_object()
            .cloned()
            .unwrap();
        let err = ScaleMounter
            .mount(Path::new("/ubiquity/ignored"), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FlexError::Mounter { .. }));
    }
}
