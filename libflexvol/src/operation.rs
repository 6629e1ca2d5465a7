//! Operations a single driver invocation can carry.
//!
//! [`FlexOperation`] is what the driver binary builds from its command line
//! and hands to [`crate::controller::FlexController::dispatch`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FlexOperation {
    /// Plugin initialization handshake.
    Init,
    /// Activate the configured backends on the control plane.
    TestConnectivity,
    Attach(AttachRequest),
    Detach(DetachRequest),
    Mount(MountRequest),
    Unmount(UnmountRequest),
    IsAttached(IsAttachedRequest),
    WaitForAttach(WaitForAttachRequest),
    GetVolumeName(GetVolumeNameRequest),
    MountDevice(MountDeviceRequest),
    UnmountDevice(UnmountDeviceRequest),
}

impl FlexOperation {
    /// Operation name as used on the driver command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::TestConnectivity => "testubiquity",
            Self::Attach(_) => "attach",
            Self::Detach(_) => "detach",
            Self::Mount(_) => "mount",
            Self::Unmount(_) => "unmount",
            Self::IsAttached(_) => "isattached",
            Self::WaitForAttach(_) => "waitforattach",
            Self::GetVolumeName(_) => "getvolumename",
            Self::MountDevice(_) => "mountdevice",
            Self::UnmountDevice(_) => "unmountdevice",
        }
    }
}

impl fmt::Display for FlexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
