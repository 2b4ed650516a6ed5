//! Declarative configuration loading from YAML, TOML, and environment variables.
//!
//! This module provides file-based configuration support through mirror structs
//! that can be deserialized with serde. These structs are then converted into the
//! programmatic [`ClientConfig`](crate::config::ClientConfig) using the builder API.
//!
//! # Supported Formats
//!
//! - **YAML** (requires `config-file` feature): `ClientConfig::from_yaml("zk.yaml")`
//! - **TOML** (requires `config-file` feature): `ClientConfig::from_toml("zk.toml")`
//! - **Environment Variables** (always available): `ClientConfig::from_env()`
//!
//! # Example YAML
//!
//! ```yaml
//! connect-string: "zk1:2181,zk2:2181,zk3:2181/app"
//! session-timeout-ms: 30000
//! connect-timeout-ms: 5000
//! request-timeout-ms: 10000
//! can-be-read-only: false
//! max-packet-size: 4194304
//! retry:
//!   initial-backoff-ms: 100
//!   max-backoff-ms: 10000
//!   max-retries: 10
//! auth:
//!   - scheme: digest
//!     credential: "app:secret"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, ClientConfigBuilder, ConfigError};

/// Top-level file-based configuration.
///
/// This struct mirrors [`ClientConfig`](crate::config::ClientConfig) but uses
/// serde-friendly types. It can be deserialized from YAML or TOML and then
/// converted to `ClientConfig` via [`TryFrom`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileConfig {
    /// Connect string, `host:port,host:port/chroot`.
    pub connect_string: Option<String>,
    /// Additional ensemble members as `host:port`.
    pub servers: Option<Vec<String>>,
    /// Chroot overriding the one in the connect string.
    pub chroot: Option<String>,
    /// Requested session timeout in milliseconds.
    pub session_timeout_ms: Option<u64>,
    /// Timeout of a single connection attempt in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Default per-operation timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// Whether read-only servers are acceptable.
    pub can_be_read_only: Option<bool>,
    /// Largest packet accepted from the ensemble.
    pub max_packet_size: Option<usize>,
    /// Retry/reconnection configuration.
    pub retry: Option<FileRetryConfig>,
    /// Credentials added on every connect.
    pub auth: Option<Vec<FileAuthConfig>>,
}

/// File-based retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", default)]
pub struct FileRetryConfig {
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: Option<u64>,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: Option<u64>,
    /// Maximum number of initial connection attempts.
    pub max_retries: Option<u32>,
}

/// File-based credential.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct FileAuthConfig {
    /// Authentication scheme, e.g. `digest`.
    pub scheme: String,
    /// Credential as UTF-8 text.
    pub credential: String,
}

impl TryFrom<FileConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, Self::Error> {
        let mut builder = ClientConfigBuilder::new();

        if let Some(cs) = file.connect_string {
            builder = builder.connect_string(cs);
        }

        if let Some(servers) = file.servers {
            for server in servers {
                builder = builder.add_server(server);
            }
        }

        if let Some(chroot) = file.chroot {
            builder = builder.chroot(chroot);
        }

        if let Some(ms) = file.session_timeout_ms {
            builder = builder.session_timeout(Duration::from_millis(ms));
        }

        if let Some(ms) = file.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }

        if let Some(ms) = file.request_timeout_ms {
            builder = builder.request_timeout(Duration::from_millis(ms));
        }

        if let Some(read_only) = file.can_be_read_only {
            builder = builder.can_be_read_only(read_only);
        }

        if let Some(size) = file.max_packet_size {
            builder = builder.max_packet_size(size);
        }

        if let Some(retry) = file.retry {
            builder = builder.retry(|mut r| {
                if let Some(ms) = retry.initial_backoff_ms {
                    r = r.initial_backoff(Duration::from_millis(ms));
                }
                if let Some(ms) = retry.max_backoff_ms {
                    r = r.max_backoff(Duration::from_millis(ms));
                }
                if let Some(n) = retry.max_retries {
                    r = r.max_retries(n);
                }
                r
            });
        }

        for auth in file.auth.unwrap_or_default() {
            builder = builder.add_auth(auth.scheme, auth.credential.into_bytes());
        }

        builder.build()
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file.
    ///
    /// Requires the `config-file` feature.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let config = ClientConfig::from_yaml("zookeeper.yaml")?;
    /// let zk = ZooKeeper::connect(config).await?;
    /// ```
    #[cfg(feature = "config-file")]
    pub fn from_yaml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::new(format!("failed to read YAML config file: {e}"))
        })?;
        let file_config: FileConfig = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::new(format!("failed to parse YAML config: {e}"))
        })?;
        file_config.try_into()
    }

    /// Loads configuration from a TOML file.
    ///
    /// Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::new(format!("failed to read TOML config file: {e}"))
        })?;
        let file_config: FileConfig = toml_crate::from_str(&content).map_err(|e| {
            ConfigError::new(format!("failed to parse TOML config: {e}"))
        })?;
        file_config.try_into()
    }

    /// Loads a configuration file, picking the format from its extension.
    ///
    /// Supports `.yaml`, `.yml`, and `.toml`. Requires the `config-file` feature.
    #[cfg(feature = "config-file")]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml(path),
            Some("toml") => Self::from_toml(path),
            Some(ext) => Err(ConfigError::new(format!(
                "unsupported config file extension: .{ext} (expected .yaml, .yml, or .toml)"
            ))),
            None => Err(ConfigError::new(
                "config file has no extension; expected .yaml, .yml, or .toml",
            )),
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// This method is always available (no feature flag required).
    ///
    /// # Supported Environment Variables
    ///
    /// | Variable | Maps to |
    /// |----------|---------|
    /// | `ZK_CONNECT_STRING` | `host:port,host:port/chroot` |
    /// | `ZK_SESSION_TIMEOUT_MS` | Session timeout in milliseconds |
    /// | `ZK_CONNECT_TIMEOUT_MS` | Connect timeout in milliseconds |
    /// | `ZK_REQUEST_TIMEOUT_MS` | Default operation timeout in milliseconds |
    /// | `ZK_READ_ONLY` | `"true"` or `"false"` |
    /// | `ZK_MAX_RETRIES` | Maximum initial connection attempts |
    ///
    /// Unparseable numbers are reported as errors rather than ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file_config = FileConfig {
            connect_string: lookup("ZK_CONNECT_STRING"),
            ..Default::default()
        };

        file_config.session_timeout_ms = parse_env(&lookup, "ZK_SESSION_TIMEOUT_MS")?;
        file_config.connect_timeout_ms = parse_env(&lookup, "ZK_CONNECT_TIMEOUT_MS")?;
        file_config.request_timeout_ms = parse_env(&lookup, "ZK_REQUEST_TIMEOUT_MS")?;

        if let Some(val) = lookup("ZK_READ_ONLY") {
            file_config.can_be_read_only = Some(val.eq_ignore_ascii_case("true"));
        }

        if let Some(n) = parse_env::<u32, _>(&lookup, "ZK_MAX_RETRIES")? {
            file_config.retry.get_or_insert_with(Default::default).max_retries = Some(n);
        }

        file_config.try_into()
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::new(format!("{key} is not a valid number: {val:?}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_file_config_defaults_produce_valid_client_config() {
        let config: ClientConfig = FileConfig::default().try_into().unwrap();
        assert_eq!(config.servers(), &["127.0.0.1:2181"]);
    }

    #[test]
    fn test_file_config_with_connect_string() {
        let file_config = FileConfig {
            connect_string: Some("a:1,b:2/root".to_string()),
            session_timeout_ms: Some(12_000),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.servers(), &["a:1", "b:2"]);
        assert_eq!(config.chroot(), Some("/root"));
        assert_eq!(config.session_timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_file_config_with_retry_and_auth() {
        let file_config = FileConfig {
            retry: Some(FileRetryConfig {
                initial_backoff_ms: Some(200),
                max_backoff_ms: Some(5_000),
                max_retries: Some(3),
            }),
            auth: Some(vec![FileAuthConfig {
                scheme: "digest".to_string(),
                credential: "u:p".to_string(),
            }]),
            ..Default::default()
        };
        let config: ClientConfig = file_config.try_into().unwrap();
        assert_eq!(config.retry().initial_backoff(), Duration::from_millis(200));
        assert_eq!(config.retry().max_backoff(), Duration::from_secs(5));
        assert_eq!(config.retry().max_retries(), 3);
        assert_eq!(config.auth()[0].credential(), b"u:p");
    }

    #[test]
    fn test_file_config_invalid_values_fail() {
        let file_config = FileConfig {
            chroot: Some("relative".to_string()),
            ..Default::default()
        };
        assert!(ClientConfig::try_from(file_config).is_err());
    }

    #[test]
    fn test_env_lookup() {
        let lookup = lookup_from(&[
            ("ZK_CONNECT_STRING", "zk1:2181,zk2:2181/svc"),
            ("ZK_SESSION_TIMEOUT_MS", "15000"),
            ("ZK_CONNECT_TIMEOUT_MS", "750"),
            ("ZK_REQUEST_TIMEOUT_MS", "3000"),
            ("ZK_READ_ONLY", "TRUE"),
            ("ZK_MAX_RETRIES", "4"),
        ]);
        let config = ClientConfig::from_lookup(lookup).unwrap();
        assert_eq!(config.servers(), &["zk1:2181", "zk2:2181"]);
        assert_eq!(config.chroot(), Some("/svc"));
        assert_eq!(config.session_timeout(), Duration::from_secs(15));
        assert_eq!(config.connect_timeout(), Duration::from_millis(750));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(3)));
        assert!(config.can_be_read_only());
        assert_eq!(config.retry().max_retries(), 4);
    }

    #[test]
    fn test_env_lookup_rejects_garbage_numbers() {
        let lookup = lookup_from(&[("ZK_SESSION_TIMEOUT_MS", "soon")]);
        let err = ClientConfig::from_lookup(lookup).unwrap_err();
        assert!(err.to_string().contains("ZK_SESSION_TIMEOUT_MS"));
    }

    #[test]
    fn test_env_lookup_empty_environment() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.servers(), &["127.0.0.1:2181"]);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_yaml_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "connect-string: \"zk1:2181/app\"\nsession-timeout-ms: 9000\nretry:\n  max-retries: 2\nauth:\n  - scheme: digest\n    credential: \"a:b\""
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.chroot(), Some("/app"));
        assert_eq!(config.session_timeout(), Duration::from_secs(9));
        assert_eq!(config.retry().max_retries(), 2);
        assert_eq!(config.auth()[0].scheme(), "digest");
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_toml_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "servers = [\"10.0.0.1:2181\"]\ncan-be-read-only = true\n\n[retry]\ninitial-backoff-ms = 50"
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.servers(), &["10.0.0.1:2181"]);
        assert!(config.can_be_read_only());
        assert_eq!(config.retry().initial_backoff(), Duration::from_millis(50));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_unsupported_extension() {
        let err = ClientConfig::from_file("zk.ini").unwrap_err();
        assert!(err.to_string().contains("unsupported config file extension"));
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn test_toml_round_trip() {
        let file_config = FileConfig {
            connect_string: Some("zk:2181".to_string()),
            max_packet_size: Some(65_536),
            ..Default::default()
        };
        let toml_str = toml_crate::to_string(&file_config).unwrap();
        let parsed: FileConfig = toml_crate::from_str(&toml_str).unwrap();
        assert_eq!(parsed.connect_string.as_deref(), Some("zk:2181"));
        assert_eq!(parsed.max_packet_size, Some(65_536));
    }
}
