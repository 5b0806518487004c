//! Configuration schema and loader for ringkv nodes and the orchestrator.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Peer connection timeouts, shared by nodes and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request response timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.connect_timeout_ms must be > 0".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "network.request_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Storage node configuration. Address and ports come from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the partition, replica and account files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Interface the node binds; the advertised address is separate.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Seconds between failure-detection rounds.
    #[serde(default = "default_failure_detection_interval_secs")]
    pub failure_detection_interval_secs: u64,

    /// Seconds between replication pushes.
    #[serde(default = "default_replication_interval_secs")]
    pub replication_interval_secs: u64,

    /// Milliseconds between expiry sweeps.
    #[serde(default = "default_expiry_sweep_interval_ms")]
    pub expiry_sweep_interval_ms: u64,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            listen_host: default_listen_host(),
            failure_detection_interval_secs: default_failure_detection_interval_secs(),
            replication_interval_secs: default_replication_interval_secs(),
            expiry_sweep_interval_ms: default_expiry_sweep_interval_ms(),
            network: NetworkConfig::default(),
            metrics_port: None,
        }
    }
}

/// Orchestrator (ECS) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcsConfig {
    /// Candidate roster, one `name address port` line per node.
    #[serde(default = "default_roster_path")]
    pub roster_path: PathBuf,

    /// Program spawned to start a node.
    #[serde(default = "default_launch_command")]
    pub launch_command: String,

    /// Where the orchestrator listens for DEAD_SERVER reports.
    #[serde(default = "default_recovery_listen")]
    pub recovery_listen: SocketAddr,

    /// Host that nodes are told to report to.
    #[serde(default = "default_recovery_advertise_host")]
    pub recovery_advertise_host: String,

    /// Seconds between recovery rounds.
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    /// IDENTIFY attempts against a freshly launched node.
    #[serde(default = "default_identify_attempts")]
    pub identify_attempts: u32,

    /// Pause between IDENTIFY attempts, in milliseconds.
    #[serde(default = "default_identify_backoff_ms")]
    pub identify_backoff_ms: u64,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Cache size used when a replacement node has no recorded config.
    #[serde(default = "default_cache_size")]
    pub default_cache_size: usize,

    /// Cache policy used when a replacement node has no recorded config.
    #[serde(default = "default_cache_policy")]
    pub default_cache_policy: String,

    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            roster_path: default_roster_path(),
            launch_command: default_launch_command(),
            recovery_listen: default_recovery_listen(),
            recovery_advertise_host: default_recovery_advertise_host(),
            recovery_interval_secs: default_recovery_interval_secs(),
            identify_attempts: default_identify_attempts(),
            identify_backoff_ms: default_identify_backoff_ms(),
            network: NetworkConfig::default(),
            default_cache_size: default_cache_size(),
            default_cache_policy: default_cache_policy(),
            metrics_port: None,
        }
    }
}

// --- Defaults ---

fn default_connect_timeout_ms() -> u64 {
    2000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_failure_detection_interval_secs() -> u64 {
    120
}
fn default_replication_interval_secs() -> u64 {
    300
}
fn default_expiry_sweep_interval_ms() -> u64 {
    1000
}
fn default_roster_path() -> PathBuf {
    PathBuf::from("servers.config")
}
fn default_launch_command() -> String {
    "./init_server.sh".to_string()
}
fn default_recovery_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4999))
}
fn default_recovery_advertise_host() -> String {
    "127.0.0.1".to_string()
}
fn default_recovery_interval_secs() -> u64 {
    600
}
fn default_identify_attempts() -> u32 {
    100
}
fn default_identify_backoff_ms() -> u64 {
    500
}
fn default_cache_size() -> usize {
    1
}
fn default_cache_policy() -> String {
    "FIFO".to_string()
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Consistency checks run after parsing.
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

impl Validate for NodeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_detection_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "failure_detection_interval_secs must be > 0".into(),
            ));
        }
        if self.replication_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "replication_interval_secs must be > 0".into(),
            ));
        }
        if self.expiry_sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "expiry_sweep_interval_ms must be > 0".into(),
            ));
        }
        self.network.validate()
    }
}

impl Validate for EcsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.recovery_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "recovery_interval_secs must be > 0".into(),
            ));
        }
        if self.identify_attempts == 0 {
            return Err(ConfigError::Invalid("identify_attempts must be > 0".into()));
        }
        if let Err(e) = self.default_cache_policy.parse::<ringkv_cache::EvictionPolicy>() {
            return Err(ConfigError::Invalid(format!("default_cache_policy: {}", e)));
        }
        self.network.validate()
    }
}

/// Load a config from a YAML file path.
pub fn load_from_file<T: DeserializeOwned + Validate>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a config from a YAML string.
pub fn load_from_str<T: DeserializeOwned + Validate>(yaml: &str) -> Result<T, ConfigError> {
    let config: T = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
