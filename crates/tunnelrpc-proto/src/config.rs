//! Agent configuration model
//!
//! A [`ClientConfig`] is the atomic unit the control plane pushes in a single
//! `UseConfiguration` call. It always carries one supervisor and one
//! edge-connection section; the DoH and reverse-proxy lists may be empty.

use crate::origin::Origin;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Monotonic configuration revision
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// The revision an agent starts from before any push
    pub fn init() -> Self {
        Self(0)
    }

    pub fn is_newer_or_equal(&self, other: Version) -> bool {
        self.0 >= other.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Version: {}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Full configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub version: Version,
    pub supervisor_config: SupervisorConfig,
    pub edge_connection_config: EdgeConnectionConfig,
    #[serde(default)]
    pub doh_proxy_configs: Vec<DoHProxyConfig>,
    #[serde(default)]
    pub reverse_proxy_configs: Vec<ReverseProxyConfig>,
}

/// Tuning of the background tasks owned by the supervisor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(with = "duration_nanos")]
    pub auto_update_frequency: Duration,
    #[serde(with = "duration_nanos")]
    pub metrics_update_frequency: Duration,
    #[serde(with = "duration_nanos")]
    pub grace_period: Duration,
}

/// How many edge connections to hold and how to keep them alive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConnectionConfig {
    pub num_ha_connections: u8,
    #[serde(with = "duration_nanos")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_nanos")]
    pub timeout: Duration,
    pub max_failed_heartbeats: u64,
    pub user_credential_path: String,
}

/// One DNS-over-HTTPS listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoHProxyConfig {
    pub listen_host: String,
    pub listen_port: u16,
    #[serde(default)]
    pub upstreams: Vec<String>,
}

/// One routed hostname and the origin it proxies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseProxyConfig {
    pub tunnel_hostname: String,
    #[serde(rename = "origin_config")]
    pub origin: Origin,
    pub retries: u64,
    #[serde(with = "duration_nanos")]
    pub connection_timeout: Duration,
    pub compression_quality: u64,
}

impl ReverseProxyConfig {
    pub fn new(
        tunnel_hostname: impl Into<String>,
        origin: Origin,
        retries: u64,
        connection_timeout: Duration,
        compression_quality: u64,
    ) -> Self {
        Self {
            tunnel_hostname: tunnel_hostname.into(),
            origin,
            retries,
            connection_timeout,
            compression_quality,
        }
    }
}

/// A sub-configuration: the unit of partial-failure reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubConfig {
    #[serde(rename = "supervisor_config")]
    Supervisor(SupervisorConfig),
    #[serde(rename = "edge_connection_config")]
    EdgeConnection(EdgeConnectionConfig),
    #[serde(rename = "doh_proxy_config")]
    DoHProxy(DoHProxyConfig),
    #[serde(rename = "reverse_proxy_config")]
    ReverseProxy(ReverseProxyConfig),
}

impl SubConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            SubConfig::Supervisor(_) => "SupervisorConfig",
            SubConfig::EdgeConnection(_) => "EdgeConnectionConfig",
            SubConfig::DoHProxy(_) => "DoHProxyConfig",
            SubConfig::ReverseProxy(_) => "ReverseProxyConfig",
        }
    }

    /// Human-readable reason reported to the control plane when this
    /// sub-config could not be applied
    pub fn fail_reason(&self, err: &dyn fmt::Display) -> String {
        format!("Cannot apply {}, err: {}", self.kind_name(), err)
    }
}

impl From<SupervisorConfig> for SubConfig {
    fn from(config: SupervisorConfig) -> Self {
        SubConfig::Supervisor(config)
    }
}

impl From<EdgeConnectionConfig> for SubConfig {
    fn from(config: EdgeConnectionConfig) -> Self {
        SubConfig::EdgeConnection(config)
    }
}

impl From<DoHProxyConfig> for SubConfig {
    fn from(config: DoHProxyConfig) -> Self {
        SubConfig::DoHProxy(config)
    }
}

impl From<ReverseProxyConfig> for SubConfig {
    fn from(config: ReverseProxyConfig) -> Self {
        SubConfig::ReverseProxy(config)
    }
}

/// Helper module for serializing Duration as integer nanoseconds
pub(crate) mod duration_nanos {
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = i64::try_from(duration.as_nanos())
            .map_err(|_| S::Error::custom("duration does not fit in i64 nanoseconds"))?;
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = i64::deserialize(deserializer)?;
        let nanos = u64::try_from(nanos)
            .map_err(|_| D::Error::custom(format!("negative duration: {}ns", nanos)))?;
        Ok(Duration::from_nanos(nanos))
    }
}
