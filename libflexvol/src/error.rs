//! Flex volume error types.
//!
//! All errors in the `libflexvol` crate are represented by the [`FlexError`]
//! enum. The controller never lets one escape: each operation folds its error
//! into a Failure envelope, so the [`std::fmt::Display`] text of every variant
//! is what the container platform ends up showing to the user.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error text the control plane returns when detaching a volume whose fileset
/// is already unlinked.
pub const NOT_LINKED_MESSAGE: &str = "fileset not linked";

/// Convenience alias used throughout the crate.
pub type FlexResult<T> = Result<T, FlexError>;

/// Unified error type for flex volume operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum FlexError {
    /// A required request field or option was not supplied.
    #[error("{0} not found in request")]
    MissingOption(String),

    /// The plugin configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A remote control-plane call failed.
    #[error("{op} failed: {reason}")]
    Remote {
        /// The control-plane call that failed, e.g. `GetVolumeConfig`.
        op: String,
        /// Error text reported by the control plane or the transport.
        reason: String,
    },

    /// The control plane reported that the volume is not currently linked.
    #[error("fileset not linked")]
    NotLinked,

    /// A backend mount executor failed.
    #[error("mounter.{op} failed: {reason}")]
    Mounter {
        /// The executor call that failed, e.g. `Mount`.
        op: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The mount path handed to unmount is not the symlink this plugin
    /// creates on mount.
    #[error(
        "cannot execute umount because the mountPath [{path}] is not a symlink as expected: {reason}"
    )]
    NotASymlink {
        /// The caller-supplied mount path.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// No volume known to the control plane matches the mountpoint.
    #[error("volume with mountpoint [{0}] not found")]
    VolumeNotFound(String),

    /// The backend name has no mount executor.
    #[error("mounter not found for backend: {0}")]
    NoMounterForBackend(String),

    /// The volume config lacks the attached-host attribute, or it is not a
    /// string.
    #[error("volume config of [{volume}] is missing string attribute [{key}]")]
    AttachInfoMissing {
        /// Volume whose config was inspected.
        volume: String,
        /// The attribute that was expected.
        key: String,
    },

    /// Creating the caller-visible symlink failed.
    #[error("failed to symlink {link} -> {target}: {stderr}")]
    SymlinkFailed {
        /// Real mount location the link points at.
        target: String,
        /// Path where the link was to be created.
        link: String,
        /// Diagnostic output captured from the link command.
        stderr: String,
    },

    /// A local filesystem operation failed.
    #[error("{op} {path}: {reason}")]
    Io {
        /// Operation name, e.g. `remove`.
        op: String,
        /// Path the operation targeted.
        path: String,
        /// Underlying OS error text.
        reason: String,
    },

    /// A collaborator call did not finish within its configured timeout.
    #[error("{op} timed out after {after:?}")]
    Timeout {
        /// The call that timed out.
        op: String,
        /// Configured timeout.
        after: Duration,
    },
}

impl FlexError {
    /// Create a [`FlexError::Remote`] for the named control-plane call.
    pub fn remote<E: std::fmt::Display>(op: &str, e: E) -> Self {
        Self::Remote {
            op: op.to_owned(),
            reason: e.to_string(),
        }
    }

    /// Create a [`FlexError::Mounter`] for the named executor call.
    pub fn mounter<E: std::fmt::Display>(op: &str, e: E) -> Self {
        Self::Mounter {
            op: op.to_owned(),
            reason: e.to_string(),
        }
    }

    /// Create a [`FlexError::Io`] from a failed filesystem call.
    pub fn io<E: std::fmt::Display>(op: &str, path: impl AsRef<std::path::Path>, e: E) -> Self {
        Self::Io {
            op: op.to_owned(),
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        }
    }

    /// `true` for the control-plane error that idempotent detach tolerates.
    pub fn is_not_linked(&self) -> bool {
        matches!(self, Self::NotLinked)
    }
}
