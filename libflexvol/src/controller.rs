//! The operation controller.
//!
//! One public method per protocol operation. Each takes its request record
//! and returns a [`FlexResponse`]; errors are folded into Failure envelopes
//! and never escape.
//!
//! State is never kept between calls: volume metadata and the attached host
//! come from the control plane, the real mount location is recovered from the
//! symlink left at the caller's mount path, and the only node-local
//! coordination is the [`UnmountLock`].

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::attach::AttachStateResolver;
use crate::client::{RestStorageClient, StorageClient};
use crate::config::PluginConfig;
use crate::error::{FlexError, FlexResult};
use crate::lock::UnmountLock;
use crate::mounter::{MounterFactory, SystemMounterFactory};
use crate::operation::FlexOperation;
use crate::paths::{BlockMountTemplate, MountPathResolver};
use crate::registry::MounterRegistry;
use crate::types::*;

pub struct FlexController {
    client: Arc<dyn StorageClient>,
    registry: MounterRegistry,
    attach_state: AttachStateResolver,
    paths: MountPathResolver,
    unmount_lock: UnmountLock,
    backends: Vec<String>,
}

impl FlexController {
    /// Controller talking to the configured control plane and acting on the
    /// real host.
    pub fn new(config: &PluginConfig) -> FlexResult<Self> {
        let template = BlockMountTemplate::new(config.block_mount_template.as_str())?;
        let client = Arc::new(RestStorageClient::new(config)?);
        let factory = Arc::new(SystemMounterFactory::new(config, template));
        Self::with_parts(client, factory, config)
    }

    /// Controller over caller-supplied collaborators.
    pub fn with_parts(
        client: Arc<dyn StorageClient>,
        factory: Arc<dyn MounterFactory>,
        config: &PluginConfig,
    ) -> FlexResult<Self> {
        let template = BlockMountTemplate::new(config.block_mount_template.as_str())?;
        Ok(Self {
            attach_state: AttachStateResolver::new(Arc::clone(&client)),
            client,
            registry: MounterRegistry::new(factory),
            paths: MountPathResolver::new(template),
            unmount_lock: UnmountLock::new(
                config.unmount_lock_path.clone(),
                config.unmount_retry_interval(),
            ),
            backends: config.backends.clone(),
        })
    }

    pub fn registry(&self) -> &MounterRegistry {
        &self.registry
    }

    /// Run one operation.
    pub async fn dispatch(&self, operation: FlexOperation) -> FlexResponse {
        let response = match operation {
            FlexOperation::Init => self.init(),
            FlexOperation::TestConnectivity => self.test_connectivity().await,
            FlexOperation::Attach(req) => self.attach(req).await,
            FlexOperation::Detach(req) => self.detach(req).await,
            FlexOperation::Mount(req) => self.mount(req).await,
            FlexOperation::Unmount(req) => self.unmount(req).await,
            FlexOperation::IsAttached(req) => self.is_attached(req).await,
            FlexOperation::WaitForAttach(req) => self.wait_for_attach(req),
            FlexOperation::GetVolumeName(req) => self.get_volume_name(req),
            FlexOperation::MountDevice(req) => self.mount_device(req),
            FlexOperation::UnmountDevice(req) => self.unmount_device(req),
        };
        debug!(%response, "operation finished");
        response
    }

    pub fn init(&self) -> FlexResponse {
        debug!("plugin init");
        FlexResponse::success()
    }

    #[instrument(skip(self))]
    pub async fn test_connectivity(&self) -> FlexResponse {
        match self.client.activate(&self.backends).await {
            Ok(()) => {
                info!(backends = ?self.backends, "control plane reachable");
                FlexResponse::success()
            }
            Err(e) => failure(format!("Test ubiquity failed {e}")),
        }
    }

    #[instrument(skip(self))]
    pub async fn attach(&self, req: AttachRequest) -> FlexResponse {
        let host = if req.host.is_empty() {
            local_hostname()
        } else {
            req.host.clone()
        };
        match self.client.attach(&req.name, &host).await {
            Ok(_) => {
                info!(volume = %req.name, %host, "volume attached");
                FlexResponse::success()
            }
            Err(e) => failure(format!("Failed to attach volume [{}], Error: {e}", req.name)),
        }
    }

    #[instrument(skip(self))]
    pub async fn detach(&self, req: DetachRequest) -> FlexResponse {
        if req.version.is_legacy() {
            debug!("legacy detach (skipping)");
            return FlexResponse::success();
        }
        match self.do_detach(&req.name, &req.host, true).await {
            Ok(()) => FlexResponse::success(),
            Err(e) => failure(format!(
                "Failed to detach volume [{}] from host [{}]. Error: {e}",
                req.name, req.host
            )),
        }
    }

    #[instrument(skip(self))]
    pub async fn is_attached(&self, req: IsAttachedRequest) -> FlexResponse {
        match self.do_is_attached(&req.opts, &req.host).await {
            Ok(attached) => FlexResponse::attached(attached),
            Err(e) => {
                let name = req
                    .opts
                    .get(OPT_VOLUME_NAME)
                    .map(String::as_str)
                    .unwrap_or(&req.name);
                failure(format!("Failed to check IsAttached volume [{name}], Error: {e}"))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn mount(&self, req: MountRequest) -> FlexResponse {
        match self.do_mount(&req).await {
            Ok(()) => FlexResponse::success(),
            Err(e) => failure(e.to_string()),
        }
    }

    /// Unmount the volume behind `req.mount_path`.
    ///
    /// Holds the node-wide unmount lock for the whole sequence, including the
    /// legacy detach that follows a successful unmount.
    #[instrument(skip(self))]
    pub async fn unmount(&self, req: UnmountRequest) -> FlexResponse {
        debug!(lock = %self.unmount_lock.path().display(), "asking for unmount lock");
        let _guard = self.unmount_lock.acquire().await;

        let mount_path = Path::new(&req.mount_path);
        let result = match self.do_unmount(mount_path).await {
            Ok(()) => self.legacy_detach(mount_path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => FlexResponse::success(),
            Err(e) => failure(e.to_string()),
        }
    }

    pub fn wait_for_attach(&self, req: WaitForAttachRequest) -> FlexResponse {
        debug!(?req, "waitforattach not supported");
        FlexResponse::not_supported()
    }

    pub fn get_volume_name(&self, req: GetVolumeNameRequest) -> FlexResponse {
        debug!(?req, "getvolumename not supported");
        FlexResponse::not_supported()
    }

    pub fn mount_device(&self, req: MountDeviceRequest) -> FlexResponse {
        debug!(?req, "mountdevice not supported");
        FlexResponse::not_supported()
    }

    pub fn unmount_device(&self, req: UnmountDeviceRequest) -> FlexResponse {
        debug!(?req, "unmountdevice not supported");
        FlexResponse::not_supported()
    }

    // -----------------------------------------------------------------------
    // Protocols
    // -----------------------------------------------------------------------

    async fn do_is_attached(&self, opts: &Options, host: &str) -> FlexResult<bool> {
        let name = opts.get(OPT_VOLUME_NAME).ok_or_else(|| {
            FlexError::MissingOption(format!("isAttachedRequest.Opts[{OPT_VOLUME_NAME}]"))
        })?;
        self.attach_state.is_attached_to(name, host).await
    }

    /// Detach `name` from `host`.
    ///
    /// An empty `host` is resolved through the attach state; that only
    /// happens for the implicit detach after unmount. A "not linked" answer
    /// from the control plane counts as success.
    async fn do_detach(&self, name: &str, host: &str, check_attached: bool) -> FlexResult<()> {
        if check_attached {
            let mut opts = Options::new();
            opts.insert(OPT_VOLUME_NAME.to_owned(), name.to_owned());
            if !self.do_is_attached(&opts, host).await? {
                debug!(volume = %name, %host, "not attached, nothing to detach");
                return Ok(());
            }
        }

        let host = if host.is_empty() {
            self.attach_state.attached_host(name).await?
        } else {
            host.to_owned()
        };

        match self.client.detach(name, &host).await {
            Ok(()) => {
                info!(volume = %name, %host, "volume detached");
                Ok(())
            }
            Err(e) if e.is_not_linked() => {
                warn!(volume = %name, %host, "volume already detached");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn do_mount(&self, req: &MountRequest) -> FlexResult<()> {
        let name = req.mount_device.as_str();
        let config = self.client.get_volume_config(name).await?;
        let volume = self.client.get_volume(name).await?;
        let mounter = self.registry.get_for_backend(&volume.backend)?;

        let wwn = req
            .opts
            .get(OPT_WWN)
            .ok_or_else(|| FlexError::MissingOption(format!("mountRequest.Opts[{OPT_WWN}]")))?;
        let mountpoint = self.paths.block_mountpoint(wwn);

        let mounted = mounter.mount(&mountpoint, &config).await?;
        let link = self
            .paths
            .link_after_mount(Path::new(&req.mount_path), &mounted, req.version)
            .await?;
        info!(volume = %name, mounted = %mounted.display(), link = %link.display(), "volume mounted");
        Ok(())
    }

    async fn do_unmount(&self, mount_path: &Path) -> FlexResult<()> {
        let target = self.paths.resolve_link(mount_path).await?;
        match self.paths.classify(&target) {
            BackendFamily::Block => self.unmount_block(mount_path, &target).await,
            BackendFamily::Filesystem => self.unmount_filesystem(mount_path).await,
        }
    }

    async fn unmount_block(&self, mount_path: &Path, target: &Path) -> FlexResult<()> {
        let name = volume_name_from_path(mount_path)?;
        let volume = self.client.get_volume(name).await?;
        let mounter = self.registry.get_for_backend(&volume.backend)?;
        let config = self.client.get_volume_config(name).await?;

        mounter.unmount(&config).await?;

        debug!(link = %mount_path.display(), target = %target.display(), "removing slink");
        self.paths.remove_link(mount_path).await?;
        info!(volume = %name, "block volume unmounted");
        Ok(())
    }

    async fn unmount_filesystem(&self, mount_path: &Path) -> FlexResult<()> {
        let wanted = mount_path.to_string_lossy();
        let volumes = self.client.list_volumes().await?;
        let volume = volumes
            .iter()
            .find(|v| v.mountpoint == wanted)
            .ok_or_else(|| FlexError::VolumeNotFound(wanted.to_string()))?;

        match self.client.detach(&volume.name, "").await {
            Ok(()) => {}
            Err(e) if e.is_not_linked() => {
                warn!(volume = %volume.name, "fileset already unlinked");
            }
            Err(e) => return Err(e),
        }
        info!(volume = %volume.name, mountpoint = %wanted, "filesystem volume unmounted");
        Ok(())
    }

    /// Detach after unmount for callers that never send a detach of their
    /// own, followed by the backend's after-detach hook.
    async fn legacy_detach(&self, mount_path: &Path) -> FlexResult<()> {
        let name = volume_name_from_path(mount_path)?;
        self.do_detach(name, "", false).await?;
        self.after_detach(name).await
    }

    async fn after_detach(&self, name: &str) -> FlexResult<()> {
        let volume = self.client.get_volume(name).await?;
        let mounter = self.registry.get_for_backend(&volume.backend)?;
        let config = self.client.get_volume_config(name).await?;
        mounter.action_after_detach(&config).await
    }
}

impl std::fmt::Debug for FlexController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlexController")
            .field("registry", &self.registry)
            .field("paths", &self.paths)
            .field("unmount_lock", &self.unmount_lock)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

fn failure(message: String) -> FlexResponse {
    error!(%message, "operation failed");
    FlexResponse::failure(message)
}

/// The volume name is the final segment of the caller's mount path.
fn volume_name_from_path(mount_path: &Path) -> FlexResult<&str> {
    mount_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FlexError::VolumeNotFound(mount_path.display().to_string()))
}

/// Node hostname; empty when it cannot be read.
fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "cannot read hostname");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_name_is_last_segment() {
        assert_eq!(
            volume_name_from_path(Path::new("/var/lib/kubelet/pods/x/volumes/y/pvc-1")).unwrap(),
            "pvc-1"
        );
        assert!(volume_name_from_path(Path::new("/")).is_err());
    }
}
