//! Volume-plugin command line.
//!
//! The container platform calls the driver as `rkflex <op> <args...>` with
//! request options passed as a JSON string map.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libflexvol::{
    AttachRequest, DetachRequest, FlexOperation, GetVolumeNameRequest, IsAttachedRequest,
    MountDeviceRequest, MountRequest, OPT_PV_OR_VOLUME_NAME, OPT_VOLUME_NAME, Options,
    ProtocolVersion, UnmountDeviceRequest, UnmountRequest, WaitForAttachRequest,
};

#[derive(Parser, Debug)]
#[command(name = "rkflex", version, about = "Flex volume driver")]
pub struct Cli {
    /// Plugin configuration file; the environment is used when omitted
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the driver
    Init,
    /// Check that the storage control plane is reachable
    #[command(name = "testubiquity")]
    TestUbiquity,
    /// Attach a volume; no host means a 1.5 caller
    Attach {
        json_options: String,
        host: Option<String>,
    },
    /// Detach a volume; no host means a 1.5 caller
    Detach { name: String, host: Option<String> },
    /// `mount <dir> <json>`, or `mount <dir> <device> <json>` for 1.5 callers
    Mount {
        dir: String,
        device_or_options: String,
        json_options: Option<String>,
    },
    Unmount { dir: String },
    #[command(name = "isattached")]
    IsAttached { json_options: String, host: String },
    #[command(name = "waitforattach")]
    WaitForAttach { device: String, json_options: String },
    #[command(name = "getvolumename")]
    GetVolumeName { json_options: String },
    #[command(name = "mountdevice")]
    MountDevice {
        dir: String,
        device: String,
        json_options: String,
    },
    #[command(name = "unmountdevice")]
    UnmountDevice { device: String },
}

impl Command {
    /// Translate the command line into a controller operation.
    pub fn into_operation(self) -> Result<FlexOperation> {
        let operation = match self {
            Command::Init => FlexOperation::Init,
            Command::TestUbiquity => FlexOperation::TestConnectivity,
            Command::Attach { json_options, host } => {
                let opts = parse_options(&json_options)?;
                let name = required(&opts, OPT_VOLUME_NAME)?;
                FlexOperation::Attach(AttachRequest {
                    name,
                    version: version_for(host.as_deref()),
                    host: host.unwrap_or_default(),
                    opts,
                })
            }
            Command::Detach { name, host } => FlexOperation::Detach(DetachRequest {
                name,
                version: version_for(host.as_deref()),
                host: host.unwrap_or_default(),
            }),
            Command::Mount {
                dir,
                device_or_options,
                json_options: Some(json_options),
            } => FlexOperation::Mount(MountRequest {
                mount_path: dir,
                mount_device: device_or_options,
                opts: parse_options(&json_options)?,
                version: ProtocolVersion::V1_5,
            }),
            Command::Mount {
                dir,
                device_or_options,
                json_options: None,
            } => {
                let opts = parse_options(&device_or_options)?;
                FlexOperation::Mount(MountRequest {
                    mount_path: dir,
                    mount_device: required(&opts, OPT_PV_OR_VOLUME_NAME)?,
                    opts,
                    version: ProtocolVersion::V1_6,
                })
            }
            Command::Unmount { dir } => {
                FlexOperation::Unmount(UnmountRequest { mount_path: dir })
            }
            Command::IsAttached { json_options, host } => {
                FlexOperation::IsAttached(IsAttachedRequest {
                    name: String::new(),
                    host,
                    opts: parse_options(&json_options)?,
                })
            }
            Command::WaitForAttach {
                device,
                json_options,
            } => FlexOperation::WaitForAttach(WaitForAttachRequest {
                name: device,
                opts: parse_options(&json_options)?,
            }),
            Command::GetVolumeName { json_options } => {
                FlexOperation::GetVolumeName(GetVolumeNameRequest {
                    opts: parse_options(&json_options)?,
                })
            }
            Command::MountDevice {
                dir,
                device,
                json_options,
            } => FlexOperation::MountDevice(MountDeviceRequest {
                name: device,
                mount_path: dir,
                opts: parse_options(&json_options)?,
            }),
            Command::UnmountDevice { device } => {
                FlexOperation::UnmountDevice(UnmountDeviceRequest { name: device })
            }
        };
        Ok(operation)
    }
}

fn parse_options(raw: &str) -> Result<Options> {
    serde_json::from_str(raw).with_context(|| format!("failed to parse options [{raw}]"))
}

fn required(opts: &Options, key: &str) -> Result<String> {
    opts.get(key)
        .cloned()
        .with_context(|| format!("{key} not found in options"))
}

/// Only 1.5 callers leave out the host.
fn version_for(host: Option<&str>) -> ProtocolVersion {
    match host {
        Some(_) => ProtocolVersion::V1_6,
        None => ProtocolVersion::V1_5,
    }
}
