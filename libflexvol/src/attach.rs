//! Attach-state resolution.
//!
//! The control plane records the host a volume is attached to in the
//! volume's config under [`ATTACH_TO_HOST_KEY`]; an empty value means the
//! volume is attached nowhere. Nothing is cached: every question goes back to
//! the control plane.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::client::StorageClient;
use crate::error::{FlexError, FlexResult};
use crate::types::ATTACH_TO_HOST_KEY;

#[derive(Clone)]
pub struct AttachStateResolver {
    client: Arc<dyn StorageClient>,
}

impl AttachStateResolver {
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        Self { client }
    }

    /// Host `name` is attached to, empty when not attached.
    #[instrument(skip(self))]
    pub async fn attached_host(&self, name: &str) -> FlexResult<String> {
        let config = self.client.get_volume_config(name).await?;
        let host = config
            .get(ATTACH_TO_HOST_KEY)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| FlexError::AttachInfoMissing {
                volume: name.to_owned(),
                key: ATTACH_TO_HOST_KEY.to_owned(),
            })?;
        debug!(attach_to = %host, "resolved attached host");
        Ok(host.to_owned())
    }

    /// `true` iff the recorded host equals `host` exactly.
    ///
    /// An empty `host` therefore matches a volume that is attached nowhere.
    pub async fn is_attached_to(&self, name: &str, host: &str) -> FlexResult<bool> {
        let attached_to = self.attached_host(name).await?;
        let attached = attached_to == host;
        debug!(%host, %attached_to, attached, "attach state");
        Ok(attached)
    }
}

impl std::fmt::Debug for AttachStateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachStateResolver").finish_non_exhaustive()
    }
}
