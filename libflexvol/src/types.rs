//! Core flex volume types: operation requests, the response envelope,
//! control-plane volume records and backend kinds.
//!
//! Everything here is [`Serialize`]/[`Deserialize`] so the driver binary can
//! print envelopes and the REST client can decode control-plane payloads
//! without intermediate types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FlexError;

/// Volume config attribute holding the host the volume is attached to.
/// An empty string means "not attached to any host".
pub const ATTACH_TO_HOST_KEY: &str = "attach-to";

/// Mount option carrying the block device WWN.
pub const OPT_WWN: &str = "Wwn";

/// Option carrying the volume name in attach / is-attached requests.
pub const OPT_VOLUME_NAME: &str = "volumeName";

/// Option carrying the PV name in mount requests from 1.6+ callers.
pub const OPT_PV_OR_VOLUME_NAME: &str = "kubernetes.io/pvOrVolumeName";

/// Opaque, backend-specific attributes of a volume.
pub type VolumeConfig = serde_json::Map<String, serde_json::Value>;

/// Request options as passed by the container platform.
pub type Options = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Protocol version
// ---------------------------------------------------------------------------

/// Volume-plugin protocol generation of the caller.
///
/// 1.5 callers neither send a host on attach/detach nor pre-create the mount
/// directory; later callers do both.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Kubernetes 1.5 flex protocol.
    #[serde(rename = "1.5")]
    V1_5,
    /// Kubernetes 1.6 and later.
    #[default]
    #[serde(rename = "1.6")]
    V1_6,
}

impl ProtocolVersion {
    /// `true` for callers that do not pre-create the mount directory.
    pub fn is_legacy(self) -> bool {
        self == Self::V1_5
    }
}

// ---------------------------------------------------------------------------
// Backend kinds
// ---------------------------------------------------------------------------

/// Storage families a backend belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFamily {
    /// Host-side block device mounted under the block-mount template.
    Block,
    /// Network or cluster filesystem identified by mountpoint equality.
    Filesystem,
}

/// Backends the control plane may report for a volume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Block volumes provisioned through SCBE.
    #[serde(rename = "scbe")]
    Scbe,
    /// Spectrum Scale filesets mounted natively on the node.
    #[serde(rename = "spectrum-scale")]
    SpectrumScale,
    /// Spectrum Scale filesets exported over NFS.
    #[serde(rename = "spectrum-scale-nfs")]
    SpectrumScaleNfs,
    /// SoftLayer file storage exported over NFS.
    #[serde(rename = "softlayer-nfs")]
    SoftlayerNfs,
}

impl BackendKind {
    /// Every known backend kind.
    pub const ALL: [BackendKind; 4] = [
        Self::Scbe,
        Self::SpectrumScale,
        Self::SpectrumScaleNfs,
        Self::SoftlayerNfs,
    ];

    /// Backend name as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scbe => "scbe",
            Self::SpectrumScale => "spectrum-scale",
            Self::SpectrumScaleNfs => "spectrum-scale-nfs",
            Self::SoftlayerNfs => "softlayer-nfs",
        }
    }

    pub fn family(self) -> BackendFamily {
        match self {
            Self::Scbe => BackendFamily::Block,
            Self::SpectrumScale | Self::SpectrumScaleNfs | Self::SoftlayerNfs => {
                BackendFamily::Filesystem
            }
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| FlexError::NoMounterForBackend(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Control-plane records
// ---------------------------------------------------------------------------

/// A volume as recorded by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume name (the PV name).
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    /// Backend name, parsed into a [`BackendKind`] on use.
    #[serde(rename = "Backend", alias = "backend", default)]
    pub backend: String,
    /// Mountpoint assigned by the control plane, empty when not mounted.
    #[serde(rename = "Mountpoint", alias = "mountpoint", default)]
    pub mountpoint: String,
}

impl Volume {
    pub fn backend_kind(&self) -> Result<BackendKind, FlexError> {
        self.backend.parse()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Attach a volume to a host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachRequest {
    pub name: String,
    /// Target host; empty for 1.5 callers.
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub opts: Options,
    #[serde(default)]
    pub version: ProtocolVersion,
}

/// Detach a volume from a host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetachRequest {
    pub name: String,
    /// Host to detach from; empty means "whatever host is recorded".
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub version: ProtocolVersion,
}

/// Mount a volume for a pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountRequest {
    /// Caller-expected mount path.
    pub mount_path: String,
    /// Volume (PV) name.
    pub mount_device: String,
    #[serde(default)]
    pub opts: Options,
    #[serde(default)]
    pub version: ProtocolVersion,
}

/// Unmount a volume from a pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnmountRequest {
    pub mount_path: String,
}

/// Ask whether a volume is attached to a host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsAttachedRequest {
    #[serde(default)]
    pub name: String,
    pub host: String,
    /// Must carry [`OPT_VOLUME_NAME`].
    #[serde(default)]
    pub opts: Options,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitForAttachRequest {
    pub name: String,
    #[serde(default)]
    pub opts: Options,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetVolumeNameRequest {
    #[serde(default)]
    pub opts: Options,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountDeviceRequest {
    pub name: String,
    pub mount_path: String,
    #[serde(default)]
    pub opts: Options,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnmountDeviceRequest {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// Outcome reported to the container platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Failure,
    #[serde(rename = "Not supported")]
    NotSupported,
}

/// Uniform response returned by every operation.
///
/// `message` is only populated for [`ResponseStatus::Failure`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlexResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device: String,
    #[serde(default)]
    pub attached: bool,
}

impl FlexResponse {
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            message: String::new(),
            device: String::new(),
            attached: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failure,
            message: message.into(),
            ..Self::success()
        }
    }

    pub fn not_supported() -> Self {
        Self {
            status: ResponseStatus::NotSupported,
            ..Self::success()
        }
    }

    /// Successful is-attached answer.
    pub fn attached(attached: bool) -> Self {
        Self {
            attached,
            ..Self::success()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

impl fmt::Display for FlexResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            ResponseStatus::Success => write!(f, "Success(attached={})", self.attached),
            ResponseStatus::Failure => write!(f, "Failure({})", self.message),
            ResponseStatus::NotSupported => f.write_str("NotSupported"),
        }
    }
}
