//! Configuration loading and types for gcsproxy.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  It is built once at startup and never mutated
//! afterwards; handlers only ever see it behind a shared reference.

use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Bucket served when the bucket is not taken from the request path.
    #[serde(default)]
    pub bucket_name: String,

    /// Primary proxy endpoint settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Path-mapping endpoint settings.
    #[serde(default)]
    pub map: MapConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Primary proxy endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// URL path prefix the proxy is mounted on.
    #[serde(default = "default_proxy_endpoint")]
    pub endpoint: String,

    /// Take the bucket from the first path segment instead of `bucket_name`.
    #[serde(default)]
    pub bucket_on_path: bool,

    /// Upper bound for a whole backend fetch, in seconds.
    #[serde(
        default = "default_proxy_timeout",
        deserialize_with = "deserialize_seconds"
    )]
    pub timeout: Duration,

    /// Request headers whose values are included in access logs, in order.
    #[serde(default)]
    pub log_headers: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoint: default_proxy_endpoint(),
            bucket_on_path: false,
            timeout: default_proxy_timeout(),
            log_headers: Vec::new(),
        }
    }
}

/// Path-mapping endpoint configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapConfig {
    /// URL path prefix; empty disables path mapping.
    #[serde(default)]
    pub endpoint: String,
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `gcs`, `local` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Google Cloud Storage settings.
    #[serde(default)]
    pub gcs: GcsStorageConfig,

    /// Local directory settings.
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            gcs: GcsStorageConfig::default(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Google Cloud Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GcsStorageConfig {
    /// JSON API base URL (override for emulators).
    #[serde(default = "default_gcs_endpoint")]
    pub endpoint: String,

    /// Path to an `authorized_user` credentials JSON file.
    #[serde(default)]
    pub credentials_file: String,

    /// Send requests without credentials.
    #[serde(default)]
    pub anonymous: bool,
}

impl Default for GcsStorageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gcs_endpoint(),
            credentials_file: String::new(),
            anonymous: false,
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory; each subdirectory is a bucket.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Metrics are off by default because the metrics path shares the URL
/// space with proxied object keys.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the metrics endpoint.
    #[serde(default)]
    pub metrics: bool,

    /// Path of the metrics endpoint.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: false,
            metrics_path: default_metrics_path(),
        }
    }
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket_name.is_empty() && !self.proxy.bucket_on_path {
            anyhow::bail!("bucket_name is required unless proxy.bucket_on_path is enabled");
        }
        if self.proxy.timeout.is_zero() {
            anyhow::bail!("proxy.timeout must be greater than zero");
        }
        if !self.map.endpoint.is_empty() {
            let map = normalize_endpoint(&self.map.endpoint);
            let proxy = normalize_endpoint(&self.proxy.endpoint);
            if proxy.starts_with(&map) {
                anyhow::bail!("map.endpoint {map} shadows proxy.endpoint {proxy}");
            }
        }
        match self.storage.backend.as_str() {
            "gcs" | "local" | "memory" => Ok(()),
            other => anyhow::bail!("unknown storage backend '{other}'"),
        }
    }
}

/// Normalize an endpoint prefix so it starts and ends with `/`.
///
/// An empty endpoint becomes `/`.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

// -- Defaults ----------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_proxy_endpoint() -> String {
    "/".to_string()
}

fn default_proxy_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_storage_backend() -> String {
    "gcs".to_string()
}

fn default_gcs_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_storage_root() -> String {
    "./data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let config = read_config(path)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse configuration without validating it, so that command-line
/// overrides can be applied first.
pub fn read_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Parse and validate configuration from YAML text.
pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

// -- Tests -------------------------------------------------------------------
