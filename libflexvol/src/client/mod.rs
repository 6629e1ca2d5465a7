//! Remote storage control-plane client.
//!
//! The control plane is the single source of truth for volume metadata and
//! attachment records; the orchestrator only reads it and asks it to attach
//! or detach. [`StorageClient`] is the seam between the controller and the
//! transport, [`rest::RestStorageClient`] the production implementation.

pub mod rest;

use async_trait::async_trait;

use crate::error::FlexResult;
use crate::types::{Volume, VolumeConfig};

pub use rest::RestStorageClient;

/// Control-plane operations consumed by the controller.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Activate the given backends on the control plane.
    async fn activate(&self, backends: &[String]) -> FlexResult<()>;

    /// Attach `name` to `host`, returning the device / mountpoint reported
    /// by the control plane.
    async fn attach(&self, name: &str, host: &str) -> FlexResult<String>;

    /// Detach `name` from `host`.
    ///
    /// Returns [`crate::FlexError::NotLinked`] when the volume is not
    /// currently linked.
    async fn detach(&self, name: &str, host: &str) -> FlexResult<()>;

    async fn get_volume(&self, name: &str) -> FlexResult<Volume>;

    async fn get_volume_config(&self, name: &str) -> FlexResult<VolumeConfig>;

    async fn list_volumes(&self) -> FlexResult<Vec<Volume>>;
}
