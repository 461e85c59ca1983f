use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub topics: TopicsConf,
    pub snapshot: SnapshotConf,
    pub http: HttpConf,
    pub fanout: FanoutConf,
    pub debug: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Snapshot replies can be large; applies to incoming and outgoing packets.
    pub max_packet_bytes: usize,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "nagsync-kernel".into(),
            keep_alive_secs: 15,
            max_packet_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TopicsConf {
    /// Prefix; the kernel subscribes to `{events}/#`.
    pub events: String,
    pub snapshot_request: String,
    pub snapshot_response: String,
}

impl Default for TopicsConf {
    fn default() -> Self {
        Self {
            events: "nagios/events".into(),
            snapshot_request: "nagios/snapshot/request".into(),
            snapshot_response: "nagios/snapshot/response".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SnapshotConf {
    /// A reply needs more keys than this to count as a full dump.
    pub min_records: usize,
    /// Published verbatim as the snapshot request.
    pub request: Value,
}

impl Default for SnapshotConf {
    fn default() -> Self {
        Self {
            min_records: 100,
            request: json!({ "list_hosts": true, "list_services": true, "expand_lists": true }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FanoutConf {
    /// Deltas buffered per subscriber before it starts lagging.
    pub capacity: usize,
}

impl Default for FanoutConf {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {0} not found")]
    NotFound(String),
    #[error("unreadable config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Invalid {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub async fn load_config_from(path: &str) -> Result<KernelConfig, ConfigError> {
    if !Path::new(path).exists() {
        return Err(ConfigError::NotFound(path.to_string()));
    }
    let txt = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
    parse_config(&txt).map_err(|source| ConfigError::Invalid { path: path.to_string(), source })
}

/// Reads `NAGSYNC_CONFIG` (default `nagsync.yaml`). Runs before logging is
/// set up, so the caller logs the error and falls back to defaults.
pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("NAGSYNC_CONFIG").unwrap_or_else(|_| "nagsync.yaml".into());
    load_config_from(&path).await
}
