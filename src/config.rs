//! Typed cluster configuration.
//!
//! Parsing the surrounding config *file* (TOML/YAML/etc.) is out of scope
//! — this module only defines the shape the cluster section
//! deserialises into and the defaults it falls back to, leaving the
//! source format to callers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_check_health_second() -> u64 {
    60
}

fn default_max_idle_conn_seconds() -> u64 {
    90
}

fn default_max_conns_per_host() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPoolConfig {
    #[serde(default = "default_max_idle_conn_seconds")]
    pub max_idle_client_conn_seconds: u64,
    #[serde(default = "default_max_conns_per_host")]
    pub max_client_conns_per_host: usize,
    #[serde(default = "default_max_conns_per_host")]
    pub max_idle_client_conns_per_host: usize,
}

impl Default for ClientPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_client_conn_seconds: default_max_idle_conn_seconds(),
            max_client_conns_per_host: default_max_conns_per_host(),
            max_idle_client_conns_per_host: default_max_conns_per_host(),
        }
    }
}

/// Bootstrap-kind-specific options. `Members` is the default, config-file
/// driven bootstrap; other kinds are intentionally left as an open
/// `serde_json::Value` bag for deployments that plug in their own
/// discovery mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BootstrapOptions {
    Members { addresses: Vec<String> },
    Other(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub kind: String,
    #[serde(default)]
    pub client: ClientPoolConfig,
    #[serde(default = "default_check_health_second")]
    pub check_health_second: u64,
    pub options: BootstrapOptions,
}

impl ClusterConfig {
    pub fn check_health_interval(&self) -> Duration {
        Duration::from_secs(self.check_health_second)
    }

    pub fn idle_conn_timeout(&self) -> Duration {
        Duration::from_secs(self.client.max_idle_client_conn_seconds)
    }
}
