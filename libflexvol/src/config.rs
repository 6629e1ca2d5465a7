//! Plugin configuration.
//!
//! The driver is started fresh for every operation, so configuration is read
//! on each invocation, either from a YAML file or from the environment.
//!
//! Environment variables:
//! - `BACKENDS`: comma separated backend names to activate.
//! - `UBIQUITY_ADDRESS`, `UBIQUITY_PORT`: control-plane endpoint. The port is
//!   required.
//! - `UBIQUITY_USERNAME`, `UBIQUITY_PASSWORD`: control-plane credentials.
//! - `UBIQUITY_PLUGIN_SSL_MODE`: `disable`, `require` or `verify-full`
//!   (default).
//! - `LOG_LEVEL`, `LOG_PATH`: log filter and log file.
//! - `SCBE_SKIP_RESCAN_ISCSI`: skip host rescans for block volumes. Anything
//!   that does not parse as a bool means `false`.
//! - `SPECTRUM_NFS_REMOTE_CONFIG`: NFS client config forwarded to the NFS
//!   mounter.
//! - `FLEX_BLOCK_MOUNT_TEMPLATE`: block mount path, must contain `{wwn}`.
//!   Defaults to `/ubiquity/{wwn}`.
//! - `FLEX_UNMOUNT_LOCK_PATH`, `FLEX_UNMOUNT_RETRY_MS`: node-wide unmount lock
//!   file and its retry interval (500 ms).
//! - `FLEX_REMOTE_TIMEOUT_SECS`, `FLEX_MOUNTER_TIMEOUT_SECS`: optional call
//!   timeouts. Unset means wait forever.
//! - `FLEX_NFS_MOUNT_ROOT`: parent directory of NFS mounts (`/mnt`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlexError, FlexResult};

/// Placeholder substituted with the device WWN in the block mount template.
pub const WWN_PLACEHOLDER: &str = "{wwn}";

pub const DEFAULT_BLOCK_MOUNT_TEMPLATE: &str = "/ubiquity/{wwn}";
pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_UNMOUNT_RETRY_MS: u64 = 500;
const UNMOUNT_LOCK_FILE: &str = "ubiquity.unmount.lock";

/// TLS behavior towards the control plane.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// Plain HTTP.
    Disable,
    /// HTTPS without certificate verification.
    Require,
    /// HTTPS with full certificate verification.
    #[default]
    VerifyFull,
}

impl SslMode {
    fn parse(s: &str) -> FlexResult<Self> {
        match s {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(FlexError::InvalidConfig(format!(
                "unknown ssl mode [{other}]"
            ))),
        }
    }
}

/// Control-plane endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_owned(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// Tuning for block (SCBE) volumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScbeConfig {
    /// Skip iSCSI / multipath rescans around mount and detach.
    #[serde(default)]
    pub skip_rescan_iscsi: bool,
}

/// Tuning for NFS backed volumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NfsConfig {
    /// Opaque client config forwarded from the deployment.
    pub client_config: String,
    /// Directory NFS shares are mounted under.
    pub mount_root: PathBuf,
}

impl Default for NfsConfig {
    fn default() -> Self {
        Self {
            client_config: String::new(),
            mount_root: PathBuf::from("/mnt"),
        }
    }
}

/// Full plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub backends: Vec<String>,
    pub server: ServerConfig,
    pub ssl_mode: SslMode,
    pub credentials: Credentials,
    pub log_level: String,
    pub log_path: Option<PathBuf>,
    pub block_mount_template: String,
    pub unmount_lock_path: PathBuf,
    pub unmount_retry_interval_ms: u64,
    pub remote_timeout_secs: Option<u64>,
    pub mounter_timeout_secs: Option<u64>,
    pub scbe: ScbeConfig,
    pub nfs: NfsConfig,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            server: ServerConfig::default(),
            ssl_mode: SslMode::default(),
            credentials: Credentials::default(),
            log_level: "info".to_owned(),
            log_path: None,
            block_mount_template: DEFAULT_BLOCK_MOUNT_TEMPLATE.to_owned(),
            unmount_lock_path: std::env::temp_dir().join(UNMOUNT_LOCK_FILE),
            unmount_retry_interval_ms: DEFAULT_UNMOUNT_RETRY_MS,
            remote_timeout_secs: None,
            mounter_timeout_secs: None,
            scbe: ScbeConfig::default(),
            nfs: NfsConfig::default(),
        }
    }
}

impl PluginConfig {
    /// Load from `path` when given, otherwise from the process environment.
    pub fn load(path: Option<&Path>) -> FlexResult<Self> {
        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> FlexResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| FlexError::io("read", path, e))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| FlexError::InvalidConfig(format!("{}: {e}", path.display())))
    }

    pub fn from_env() -> FlexResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> FlexResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.backends = lookup("BACKENDS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let port = lookup("UBIQUITY_PORT").unwrap_or_default();
        config.server.port = port
            .trim()
            .parse()
            .map_err(|e| FlexError::InvalidConfig(format!("UBIQUITY_PORT [{port}]: {e}")))?;
        if let Some(address) = lookup("UBIQUITY_ADDRESS") {
            config.server.address = address;
        }
        if let Some(mode) = lookup("UBIQUITY_PLUGIN_SSL_MODE").filter(|m| !m.is_empty()) {
            config.ssl_mode = SslMode::parse(&mode)?;
        }

        config.credentials = Credentials {
            username: lookup("UBIQUITY_USERNAME").unwrap_or_default(),
            password: lookup("UBIQUITY_PASSWORD").unwrap_or_default(),
        };

        if let Some(level) = lookup("LOG_LEVEL").filter(|l| !l.is_empty()) {
            config.log_level = level;
        }
        config.log_path = lookup("LOG_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        config.scbe.skip_rescan_iscsi = lookup("SCBE_SKIP_RESCAN_ISCSI")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(false);
        config.nfs.client_config = lookup("SPECTRUM_NFS_REMOTE_CONFIG").unwrap_or_default();
        if let Some(root) = lookup("FLEX_NFS_MOUNT_ROOT").filter(|r| !r.is_empty()) {
            config.nfs.mount_root = PathBuf::from(root);
        }

        if let Some(template) = lookup("FLEX_BLOCK_MOUNT_TEMPLATE").filter(|t| !t.is_empty()) {
            config.block_mount_template = template;
        }
        if let Some(lock) = lookup("FLEX_UNMOUNT_LOCK_PATH").filter(|l| !l.is_empty()) {
            config.unmount_lock_path = PathBuf::from(lock);
        }
        if let Some(ms) = lookup("FLEX_UNMOUNT_RETRY_MS") {
            config.unmount_retry_interval_ms = parse_number("FLEX_UNMOUNT_RETRY_MS", &ms)?;
        }
        config.remote_timeout_secs = lookup("FLEX_REMOTE_TIMEOUT_SECS")
            .map(|v| parse_number("FLEX_REMOTE_TIMEOUT_SECS", &v))
            .transpose()?;
        config.mounter_timeout_secs = lookup("FLEX_MOUNTER_TIMEOUT_SECS")
            .map(|v| parse_number("FLEX_MOUNTER_TIMEOUT_SECS", &v))
            .transpose()?;

        Ok(config)
    }

    /// Reject configurations the controller cannot operate with.
    pub fn validate(&self) -> FlexResult<()> {
        if self.server.address.is_empty() {
            return Err(FlexError::InvalidConfig(
                "control-plane address is empty".into(),
            ));
        }
        let placeholders = self.block_mount_template.matches(WWN_PLACEHOLDER).count();
        if placeholders != 1 {
            return Err(FlexError::InvalidConfig(format!(
                "block mount template [{}] must contain {WWN_PLACEHOLDER} exactly once",
                self.block_mount_template
            )));
        }
        if self.unmount_retry_interval_ms == 0 {
            return Err(FlexError::InvalidConfig(
                "unmount retry interval must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_secs.map(Duration::from_secs)
    }

    pub fn mounter_timeout(&self) -> Option<Duration> {
        self.mounter_timeout_secs.map(Duration::from_secs)
    }

    pub fn unmount_retry_interval(&self) -> Duration {
        Duration::from_millis(self.unmount_retry_interval_ms)
    }
}

fn parse_number(key: &str, value: &str) -> FlexResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| FlexError::InvalidConfig(format!("{key} [{value}]: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_config_defaults() {
        let config = PluginConfig::from_lookup(lookup_from(&[
            ("UBIQUITY_PORT", "9999"),
            ("UBIQUITY_ADDRESS", "ubiquity.svc"),
            ("BACKENDS", "scbe, spectrum-scale"),
        ]))
        .unwrap();

        assert_eq!(config.backends, vec!["scbe", "spectrum-scale"]);
        assert_eq!(config.server.address, "ubiquity.svc");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.ssl_mode, SslMode::VerifyFull);
        assert_eq!(config.block_mount_template, DEFAULT_BLOCK_MOUNT_TEMPLATE);
        assert_eq!(config.unmount_retry_interval(), Duration::from_millis(500));
        assert!(config.remote_timeout().is_none());
        assert!(!config.scbe.skip_rescan_iscsi);
        config.validate().unwrap();
    }

    #[test]
    fn missing_port_is_rejected() {
        let err = PluginConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, FlexError::InvalidConfig(_)));
    }

    #[test]
    fn unparsable_skip_rescan_means_false() {
        let config = PluginConfig::from_lookup(lookup_from(&[
            ("UBIQUITY_PORT", "9999"),
            ("SCBE_SKIP_RESCAN_ISCSI", "maybe"),
        ]))
        .unwrap();
        assert!(!config.scbe.skip_rescan_iscsi);

        let config = PluginConfig::from_lookup(lookup_from(&[
            ("UBIQUITY_PORT", "9999"),
            ("SCBE_SKIP_RESCAN_ISCSI", "true"),
        ]))
        .unwrap();
        assert!(config.scbe.skip_rescan_iscsi);
    }

    #[test]
    fn timeouts_and_overrides() {
        let config = PluginConfig::from_lookup(lookup_from(&[
            ("UBIQUITY_PORT", "9999"),
            ("FLEX_REMOTE_TIMEOUT_SECS", "30"),
            ("FLEX_MOUNTER_TIMEOUT_SECS", "120"),
            ("FLEX_UNMOUNT_RETRY_MS", "50"),
            ("UBIQUITY_PLUGIN_SSL_MODE", "disable"),
        ]))
        .unwrap();
        assert_eq!(config.remote_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.mounter_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.unmount_retry_interval(), Duration::from_millis(50));
        assert_eq!(config.ssl_mode, SslMode::Disable);
    }

    #[test]
    fn template_must_hold_one_placeholder() {
        let mut config = PluginConfig::default();
        config.block_mount_template = "/ubiquity/static".into();
        assert!(config.validate().is_err());

        config.block_mount_template = "/ubiquity/{wwn}/{wwn}".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_file_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("flex.yaml");
        std::fs::write(
            &path,
            "backends: [scbe]\nserver:\n  address: 10.0.0.5\n  port: 8999\nssl_mode: require\n",
        )
        .unwrap();

        let config = PluginConfig::load(Some(&path)).unwrap();
        assert_eq!(config.backends, vec!["scbe"]);
        assert_eq!(config.server.port, 8999);
        assert_eq!(config.ssl_mode, SslMode::Require);
        assert_eq!(config.block_mount_template, DEFAULT_BLOCK_MOUNT_TEMPLATE);
    }
}
