//! Backend-specific mount executors.
//!
//! Each backend kind is served by one [`Mounter`]. The controller never
//! constructs them directly: it asks the [`crate::registry::MounterRegistry`],
//! which builds them through a [`MounterFactory`] on first use.
//!
//! | Module | Backends |
//! |---|---|
//! | [`block`] | `scbe` |
//! | [`nfs`] | `softlayer-nfs`, `spectrum-scale-nfs` |
//! | [`scale`] | `spectrum-scale` |

pub mod block;
pub mod nfs;
pub mod scale;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{NfsConfig, PluginConfig, ScbeConfig};
use crate::error::{FlexError, FlexResult};
use crate::paths::BlockMountTemplate;
use crate::types::{BackendKind, VolumeConfig};

pub use block::BlockDeviceMounter;
pub use nfs::NfsMounter;
pub use scale::ScaleMounter;

/// Node-local mount executor for one backend kind.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Make the volume available on the node.
    ///
    /// `mountpoint` is the block mount location derived from the request;
    /// filesystem backends may ignore it. Returns the real mount location.
    async fn mount(&self, mountpoint: &Path, config: &VolumeConfig) -> FlexResult<PathBuf>;

    /// Undo [`Mounter::mount`].
    async fn unmount(&self, config: &VolumeConfig) -> FlexResult<()>;

    /// Node cleanup once the control plane has detached the volume.
    async fn action_after_detach(&self, config: &VolumeConfig) -> FlexResult<()>;
}

/// Builds the executor for a backend kind.
pub trait MounterFactory: Send + Sync {
    fn create(&self, kind: BackendKind) -> FlexResult<Arc<dyn Mounter>>;
}

/// Factory producing the executors that act on the real host.
#[derive(Debug, Clone)]
pub struct SystemMounterFactory {
    template: BlockMountTemplate,
    scbe: ScbeConfig,
    nfs: NfsConfig,
    timeout: Option<Duration>,
}

impl SystemMounterFactory {
    pub fn new(config: &PluginConfig, template: BlockMountTemplate) -> Self {
        Self {
            template,
            scbe: config.scbe.clone(),
            nfs: config.nfs.clone(),
            timeout: config.mounter_timeout(),
        }
    }
}

impl MounterFactory for SystemMounterFactory {
    fn create(&self, kind: BackendKind) -> FlexResult<Arc<dyn Mounter>> {
        let mounter: Arc<dyn Mounter> = match kind {
            BackendKind::Scbe => Arc::new(BlockDeviceMounter::new(
                self.template.clone(),
                self.scbe.skip_rescan_iscsi,
                self.timeout,
            )),
            BackendKind::SpectrumScale => Arc::new(ScaleMounter),
            BackendKind::SpectrumScaleNfs | BackendKind::SoftlayerNfs => {
                Arc::new(NfsMounter::new(self.nfs.mount_root.clone(), self.timeout))
            }
        };
        Ok(mounter)
    }
}

/// Read a string attribute the executor cannot work without.
pub(crate) fn config_str<'a>(
    config: &'a VolumeConfig,
    key: &str,
    op: &str,
) -> FlexResult<&'a str> {
    config
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| FlexError::mounter(op, format!("volume config is missing [{key}]")))
}
