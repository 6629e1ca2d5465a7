//! HTTP(S) JSON client for the storage control plane.
//!
//! All endpoints live under `<scheme>://<address>:<port>/ubiquity_storage`.
//! Failed calls answer with a non-2xx status and an `{"err": "..."}` body.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::StorageClient;
use crate::config::{Credentials, PluginConfig, SslMode};
use crate::error::{FlexError, FlexResult, NOT_LINKED_MESSAGE};
use crate::types::{Volume, VolumeConfig};

const STORAGE_API_PREFIX: &str = "ubiquity_storage";

#[derive(Serialize)]
struct ActivateBody<'a> {
    backends: &'a [String],
}

#[derive(Serialize)]
struct HostBody<'a> {
    name: &'a str,
    host: &'a str,
}

#[derive(Deserialize)]
struct AttachReply {
    #[serde(default)]
    mountpoint: String,
}

#[derive(Deserialize)]
struct VolumeReply {
    volume: Volume,
}

#[derive(Deserialize)]
struct VolumeConfigReply {
    #[serde(rename = "volumeConfig")]
    volume_config: VolumeConfig,
}

#[derive(Deserialize)]
struct VolumesReply {
    #[serde(default)]
    volumes: Vec<Volume>,
}

#[derive(Deserialize)]
struct ErrorReply {
    err: String,
}

/// Control-plane client speaking the REST storage API.
pub struct RestStorageClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl RestStorageClient {
    /// Build a client from the plugin configuration.
    pub fn new(config: &PluginConfig) -> FlexResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.remote_timeout() {
            builder = builder.timeout(timeout);
        }
        if config.ssl_mode == SslMode::Require {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| FlexError::InvalidConfig(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url(config),
            credentials: config.credentials.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn call<B, T>(
        &self,
        op: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> FlexResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%op, %method, %url, "control-plane request");

        let mut request = self.http.request(method, &url);
        if !self.credentials.username.is_empty() {
            request = request.basic_auth(
                &self.credentials.username,
                Some(&self.credentials.password),
            );
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FlexError::remote(op, format!("request to {url} timed out"))
            } else {
                FlexError::remote(op, e)
            }
        })?;

        let status = response.status();
        let raw = response.bytes().await.map_err(|e| FlexError::remote(op, e))?;
        if !status.is_success() {
            return Err(error_from_reply(op, status, &raw));
        }
        if raw.is_empty() {
            return serde_json::from_slice(b"null").map_err(|e| FlexError::remote(op, e));
        }
        serde_json::from_slice(&raw)
            .map_err(|e| FlexError::remote(op, format!("malformed reply: {e}")))
    }
}

fn base_url(config: &PluginConfig) -> String {
    let scheme = match config.ssl_mode {
        SslMode::Disable => "http",
        SslMode::Require | SslMode::VerifyFull => "https",
    };
    format!(
        "{scheme}://{}:{}/{STORAGE_API_PREFIX}",
        config.server.address, config.server.port
    )
}

/// Map a failed reply onto the error taxonomy.
fn error_from_reply(op: &str, status: StatusCode, raw: &[u8]) -> FlexError {
    let message = serde_json::from_slice::<ErrorReply>(raw)
        .map(|reply| reply.err)
        .unwrap_or_else(|_| String::from_utf8_lossy(raw).trim().to_owned());

    if message == NOT_LINKED_MESSAGE {
        return FlexError::NotLinked;
    }
    if message.is_empty() {
        return FlexError::remote(op, format!("status {status}"));
    }
    FlexError::remote(op, message)
}

#[async_trait]
impl StorageClient for RestStorageClient {
    #[instrument(skip(self))]
    async fn activate(&self, backends: &[String]) -> FlexResult<()> {
        let body = ActivateBody { backends };
        let _: serde_json::Value = self
            .call("Activate", Method::POST, "activate", Some(&body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn attach(&self, name: &str, host: &str) -> FlexResult<String> {
        let reply: Option<AttachReply> = self
            .call(
                "Attach",
                Method::PUT,
                &format!("volumes/{name}/attach"),
                Some(&HostBody { name, host }),
            )
            .await?;
        Ok(reply.map(|r| r.mountpoint).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn detach(&self, name: &str, host: &str) -> FlexResult<()> {
        let _: serde_json::Value = self
            .call(
                "Detach",
                Method::PUT,
                &format!("volumes/{name}/detach"),
                Some(&HostBody { name, host }),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_volume(&self, name: &str) -> FlexResult<Volume> {
        let reply: VolumeReply = self
            .call::<(), _>("GetVolume", Method::GET, &format!("volumes/{name}"), None)
            .await?;
        Ok(reply.volume)
    }

    #[instrument(skip(self))]
    async fn get_volume_config(&self, name: &str) -> FlexResult<VolumeConfig> {
        let reply: VolumeConfigReply = self
            .call::<(), _>(
                "GetVolumeConfig",
                Method::GET,
                &format!("volumes/{name}/config"),
                None,
            )
            .await?;
        Ok(reply.volume_config)
    }

    #[instrument(skip(self))]
    async fn list_volumes(&self) -> FlexResult<Vec<Volume>> {
        let reply: VolumesReply = self
            .call::<(), _>("ListVolumes", Method::GET, "volumes", None)
            .await?;
        Ok(reply.volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_follows_ssl_mode() {
        let mut config = PluginConfig::default();
        config.server.address = "ubiquity.svc".into();
        config.server.port = 9999;
        assert_eq!(
            base_url(&config),
            "https://ubiquity.svc:9999/ubiquity_storage"
        );

        config.ssl_mode = SslMode::Disable;
        assert_eq!(base_url(&config), "http://ubiquity.svc:9999/ubiquity_storage");
    }

    #[test]
    fn not_linked_reply_is_typed() {
        let err = error_from_reply(
            "Detach",
            StatusCode::BAD_REQUEST,
            br#"{"err":"fileset not linked"}"#,
        );
        assert_eq!(err, FlexError::NotLinked);
    }

    #[test]
    fn other_replies_keep_control_plane_text() {
        let err = error_from_reply(
            "GetVolume",
            StatusCode::NOT_FOUND,
            br#"{"err":"volume not found"}"#,
        );
        assert_eq!(err.to_string(), "GetVolume failed: volume not found");

        let err = error_from_reply("GetVolume", StatusCode::BAD_GATEWAY, b"");
        assert_eq!(err.to_string(), "GetVolume failed: status 502 Bad Gateway");

        let err = error_from_reply("ListVolumes", StatusCode::INTERNAL_SERVER_ERROR, b"oops\n");
        assert_eq!(err.to_string(), "ListVolumes failed: oops");
    }

    #[test]
    fn client_builds_urls_under_prefix() {
        let mut config = PluginConfig::default();
        config.ssl_mode = SslMode::Disable;
        let client = RestStorageClient::new(&config).unwrap();
        assert_eq!(
            client.url("volumes/pvc-1/config"),
            "http://127.0.0.1:9999/ubiquity_storage/volumes/pvc-1/config"
        );
    }
}
