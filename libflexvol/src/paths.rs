//! Mount-path resolution and the symlink indirection layer.
//!
//! Executors mount a volume wherever suits their backend (block devices under
//! the block mount template, filesystems wherever the control plane put
//! them). The caller expects the data at its own mount path, so after every
//! mount a symlink bridges the two:
//!
//! ```text
//! /var/lib/kubelet/pods/<uid>/volumes/<driver>/pvc-1  ->  /ubiquity/<wwn>
//! ```
//!
//! On unmount nothing but this link tells us where the data really lives and
//! which backend family owns it, so [`BlockMountTemplate::classify`] infers
//! the family from the link target alone.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::config::WWN_PLACEHOLDER;
use crate::error::{FlexError, FlexResult};
use crate::exec;
use crate::types::{BackendFamily, ProtocolVersion};

/// Block mount path template, e.g. `/ubiquity/{wwn}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMountTemplate {
    template: String,
    prefix_len: usize,
}

impl BlockMountTemplate {
    pub fn new(template: impl Into<String>) -> FlexResult<Self> {
        let template = template.into();
        let mut found = template.match_indices(WWN_PLACEHOLDER);
        match (found.next(), found.next()) {
            (Some((prefix_len, _)), None) => Ok(Self {
                template,
                prefix_len,
            }),
            _ => Err(FlexError::InvalidConfig(format!(
                "block mount template [{template}] must contain {WWN_PLACEHOLDER} exactly once"
            ))),
        }
    }

    /// Mount location for the device with the given WWN.
    pub fn render(&self, wwn: &str) -> PathBuf {
        PathBuf::from(self.template.replacen(WWN_PLACEHOLDER, wwn, 1))
    }

    /// The template with an empty WWN: the namespace all block mounts share.
    pub fn prefix(&self) -> &str {
        &self.template[..self.prefix_len]
    }

    /// Infer the backend family of a real mount target.
    pub fn classify(&self, target: &Path) -> BackendFamily {
        if target.to_string_lossy().starts_with(self.prefix()) {
            BackendFamily::Block
        } else {
            BackendFamily::Filesystem
        }
    }
}

/// Computes on-node mount locations and manages the caller-facing symlinks.
#[derive(Debug, Clone)]
pub struct MountPathResolver {
    template: BlockMountTemplate,
}

impl MountPathResolver {
    pub fn new(template: BlockMountTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &BlockMountTemplate {
        &self.template
    }

    pub fn block_mountpoint(&self, wwn: &str) -> PathBuf {
        self.template.render(wwn)
    }

    pub fn classify(&self, target: &Path) -> BackendFamily {
        self.template.classify(target)
    }

    /// Where the symlink for `mounted` has to be created.
    ///
    /// Filesystem-backed mounts are linked into the parent of the caller's
    /// path; the link then takes the name of the mounted directory.
    pub fn link_path(&self, mount_path: &Path, mounted: &Path, version: ProtocolVersion) -> PathBuf {
        if version.is_legacy() || self.classify(mounted) == BackendFamily::Block {
            return mount_path.to_path_buf();
        }
        mount_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| mount_path.to_path_buf())
    }

    /// Expose `mounted` at the caller's `mount_path`.
    ///
    /// 1.5 callers have not created anything yet, so the parent directory is
    /// created first. Later callers pre-create `mount_path` as a directory,
    /// which has to go before a link can take its place.
    #[instrument(skip(self))]
    pub async fn link_after_mount(
        &self,
        mount_path: &Path,
        mounted: &Path,
        version: ProtocolVersion,
    ) -> FlexResult<PathBuf> {
        if version.is_legacy() {
            if let Some(parent) = mount_path.parent() {
                debug!(dir = %parent.display(), "creating volume directory");
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| FlexError::io("create volume directory", parent, e))?;
            }
        } else {
            debug!(folder = %mount_path.display(), "removing folder");
            remove_path(mount_path).await?;
        }

        let link = self.link_path(mount_path, mounted, version);
        create_symlink(mounted, &link).await?;
        debug!(mounted = %mounted.display(), link = %link.display(), "volume mounted successfully");
        Ok(link)
    }

    /// Resolve the real mount target behind the caller's mount path.
    ///
    /// The path must be a symlink; anything else means the node is not in
    /// the state a previous mount left it in.
    pub async fn resolve_link(&self, mount_path: &Path) -> FlexResult<PathBuf> {
        let not_a_symlink = |reason: String| FlexError::NotASymlink {
            path: mount_path.display().to_string(),
            reason,
        };

        let meta = tokio::fs::symlink_metadata(mount_path)
            .await
            .map_err(|e| not_a_symlink(e.to_string()))?;
        if !meta.file_type().is_symlink() {
            return Err(not_a_symlink("path is not a symlink".into()));
        }

        let target = tokio::fs::read_link(mount_path)
            .await
            .map_err(|e| not_a_symlink(e.to_string()))?;
        if target.is_absolute() {
            return Ok(target);
        }
        Ok(mount_path
            .parent()
            .map(|parent| parent.join(&target))
            .unwrap_or(target))
    }

    /// Remove the caller-facing symlink.
    pub async fn remove_link(&self, mount_path: &Path) -> FlexResult<()> {
        tokio::fs::remove_file(mount_path)
            .await
            .map_err(|e| FlexError::io("remove slink", mount_path, e))
    }
}

/// Remove a file, symlink or empty directory. A missing path is fine.
async fn remove_path(path: &Path) -> FlexResult<()> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(FlexError::io("stat", path, e)),
    };
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FlexError::io("remove existing volume directory", path, e)),
    }
}

/// `ln -s target link`, surfacing the command's stderr on failure.
async fn create_symlink(target: &Path, link: &Path) -> FlexResult<()> {
    debug!(target = %target.display(), link = %link.display(), "creating slink");
    let args = [OsStr::new("-s"), target.as_os_str(), link.as_os_str()];
    let out = exec::output("ln", &args, None).await?;
    if !out.status.success() {
        return Err(FlexError::SymlinkFailed {
            target: target.display().to_string(),
            link: link.display().to_string(),
            stderr: out.stderr,
        });
    }
    Ok(())
}
