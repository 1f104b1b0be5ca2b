//! Applies pushed configurations inside the agent process

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tunnelrpc_origin::{BuildOriginService, OriginService};
use tunnelrpc_proto::{
    ApplyOutcome, ApplyReport, ClientConfig, DoHProxyConfig, EdgeConnectionConfig, SubConfigRef,
    Version,
};
use tunnelrpc_service::ConfigApplier;

/// Upper bound on concurrent edge connections
pub const MAX_HA_CONNECTIONS: u8 = 4;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("number of HA connections must be between 1 and {MAX_HA_CONNECTIONS}, got {0}")]
    HaConnections(u8),

    #[error("heartbeat interval must be positive")]
    ZeroHeartbeat,

    #[error("timeout must be positive")]
    ZeroTimeout,

    #[error("cannot read credential {path}: {source}")]
    Credential {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid listen address {0}")]
    ListenAddress(String),

    #[error("invalid upstream {upstream}: {reason}")]
    Upstream { upstream: String, reason: String },

    #[error("empty tunnel hostname")]
    EmptyHostname,

    #[error("duplicate tunnel hostname {0}")]
    DuplicateHostname(String),
}

#[derive(Default)]
struct AppliedState {
    version: Option<Version>,
    config: Option<ClientConfig>,
    routes: HashMap<String, OriginService>,
}

/// Validates pushed configurations and keeps the routes they describe
#[derive(Default)]
pub struct AgentApplier {
    state: Mutex<AppliedState>,
}

impl AgentApplier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl AgentApplier {
    async fn current_version(&self) -> Option<Version> {
        self.state.lock().await.version
    }

    async fn current_config(&self) -> Option<ClientConfig> {
        self.state.lock().await.config.clone()
    }

    /// Hostnames with a live origin connector
    async fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.state.lock().await.routes.keys().cloned().collect();
        routes.sort();
        routes
    }
}

#[async_trait]
impl ConfigApplier for AgentApplier {
    async fn apply(&self, config: &ClientConfig) -> ApplyReport {
        let mut state = self.state.lock().await;

        if let Some(current) = state.version {
            if !config.version.is_newer_or_equal(current) {
                warn!(
                    current = current.0,
                    pushed = config.version.0,
                    "Ignoring configuration older than the applied one"
                );
                return ApplyReport::default().with_success(false);
            }
        }

        if state.config.as_ref() == Some(config) {
            debug!(version = config.version.0, "Configuration unchanged, re-applying");
        }

        let previous = state.config.take().unwrap_or_default();
        let mut previous_routes = std::mem::take(&mut state.routes);
        let mut outcomes = vec![ApplyOutcome::applied(SubConfigRef::Supervisor)];

        // Failed sub-configs leave the last good value in place
        let edge_connection_config = match validate_edge(&config.edge_connection_config) {
            Ok(()) => {
                outcomes.push(ApplyOutcome::applied(SubConfigRef::EdgeConnection));
                config.edge_connection_config.clone()
            }
            Err(e) => {
                outcomes.push(ApplyOutcome::failed(SubConfigRef::EdgeConnection, e));
                previous.edge_connection_config.clone()
            }
        };

        let mut doh_proxy_configs = Vec::new();
        for (index, doh) in config.doh_proxy_configs.iter().enumerate() {
            let target = SubConfigRef::DoHProxy(index);
            match validate_doh(doh) {
                Ok(()) => {
                    outcomes.push(ApplyOutcome::applied(target));
                    doh_proxy_configs.push(doh.clone());
                }
                Err(e) => {
                    outcomes.push(ApplyOutcome::failed(target, e));
                    if let Some(kept) = previous.doh_proxy_configs.iter().find(|old| {
                        old.listen_host == doh.listen_host && old.listen_port == doh.listen_port
                    }) {
                        doh_proxy_configs.push(kept.clone());
                    }
                }
            }
        }

        let mut routes = HashMap::new();
        let mut reverse_proxy_configs = Vec::new();
        let mut seen = HashSet::new();
        for (index, route) in config.reverse_proxy_configs.iter().enumerate() {
            let target = SubConfigRef::ReverseProxy(index);
            let hostname = route.tunnel_hostname.clone();

            if hostname.is_empty() {
                outcomes.push(ApplyOutcome::failed(target, ValidationError::EmptyHostname));
                continue;
            }
            if !seen.insert(hostname.clone()) {
                outcomes.push(ApplyOutcome::failed(
                    target,
                    ValidationError::DuplicateHostname(hostname),
                ));
                continue;
            }

            match route.origin.service() {
                Ok(service) => {
                    debug!(%hostname, origin = %service.url(), "Built origin service");
                    routes.insert(hostname, service);
                    reverse_proxy_configs.push(route.clone());
                    outcomes.push(ApplyOutcome::applied(target));
                }
                Err(e) => {
                    outcomes.push(ApplyOutcome::failed(target, e));
                    let kept = previous
                        .reverse_proxy_configs
                        .iter()
                        .find(|old| old.tunnel_hostname == hostname);
                    if let (Some(kept), Some(service)) = (kept, previous_routes.remove(&hostname)) {
                        warn!(%hostname, "Keeping previous origin for route");
                        routes.insert(hostname, service);
                        reverse_proxy_configs.push(kept.clone());
                    }
                }
            }
        }

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            version = config.version.0,
            routes = routes.len(),
            failed,
            "Applied configuration"
        );

        state.version = Some(config.version);
        state.config = Some(ClientConfig {
            version: config.version,
            supervisor_config: config.supervisor_config.clone(),
            edge_connection_config,
            doh_proxy_configs,
            reverse_proxy_configs,
        });
        state.routes = routes;

        ApplyReport::new(outcomes)
    }
}

fn validate_edge(edge: &EdgeConnectionConfig) -> Result<(), ValidationError> {
    if edge.num_ha_connections == 0 || edge.num_ha_connections > MAX_HA_CONNECTIONS {
        return Err(ValidationError::HaConnections(edge.num_ha_connections));
    }
    if edge.heartbeat_interval.is_zero() {
        return Err(ValidationError::ZeroHeartbeat);
    }
    if edge.timeout.is_zero() {
        return Err(ValidationError::ZeroTimeout);
    }
    if !edge.user_credential_path.is_empty() {
        std::fs::metadata(&edge.user_credential_path).map_err(|source| {
            ValidationError::Credential {
                path: edge.user_credential_path.clone(),
                source,
            }
        })?;
    }
    Ok(())
}

fn validate_doh(doh: &DoHProxyConfig) -> Result<(), ValidationError> {
    if doh.listen_host != "localhost" && doh.listen_host.parse::<IpAddr>().is_err() {
        return Err(ValidationError::ListenAddress(format!(
            "{}:{}",
            doh.listen_host, doh.listen_port
        )));
    }

    for upstream in &doh.upstreams {
        let url = url::Url::parse(upstream).map_err(|e| ValidationError::Upstream {
            upstream: upstream.clone(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "https" {
            return Err(ValidationError::Upstream {
                upstream: upstream.clone(),
                reason: "upstream must use https".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tunnelrpc_proto::{
        HelloWorldOriginConfig, HttpOriginConfig, Origin, ReverseProxyConfig, SubConfig,
        SupervisorConfig, UseConfigurationResult,
    };

    fn valid_config(version: u64) -> ClientConfig {
        ClientConfig {
            version: Version(version),
            supervisor_config: SupervisorConfig::default(),
            edge_connection_config: EdgeConnectionConfig {
                num_ha_connections: 4,
                heartbeat_interval: Duration::from_secs(5),
                timeout: Duration::from_secs(30),
                max_failed_heartbeats: 5,
                user_credential_path: String::new(),
            },
            doh_proxy_configs: vec![DoHProxyConfig {
                listen_host: "127.0.0.1".to_string(),
                listen_port: 5053,
                upstreams: vec!["https://1.1.1.1/dns-query".to_string()],
            }],
            reverse_proxy_configs: vec![ReverseProxyConfig::new(
                "app.example.com",
                Origin::Http(HttpOriginConfig {
                    url_string: "http://127.0.0.1:8080".to_string(),
                    ..Default::default()
                }),
                3,
                Duration::from_secs(30),
                0,
            )],
        }
    }

    async fn apply(applier: &AgentApplier, config: &ClientConfig) -> UseConfigurationResult {
        let report = applier.apply(config).await;
        UseConfigurationResult::from_report(config, &report).unwrap()
    }

    #[tokio::test]
    async fn test_valid_config_applies() {
        let applier = AgentApplier::new();
        let result = apply(&applier, &valid_config(1)).await;

        assert!(result.success);
        assert!(result.failed_configs.is_empty());
        assert_eq!(applier.current_version().await, Some(Version(1)));
        assert_eq!(applier.routes().await, vec!["app.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_older_version_rejected() {
        let applier = AgentApplier::new();
        apply(&applier, &valid_config(5)).await;

        let result = apply(&applier, &valid_config(4)).await;
        assert!(!result.success);
        assert!(result.failed_configs.is_empty());
        assert_eq!(applier.current_version().await, Some(Version(5)));
        assert_eq!(applier.current_config().await, Some(valid_config(5)));

        // Same version is re-applied
        assert!(apply(&applier, &valid_config(5)).await.success);
    }

    #[tokio::test]
    async fn test_hello_world_route_fails() {
        let applier = AgentApplier::new();
        let mut config = valid_config(1);
        config.reverse_proxy_configs.push(ReverseProxyConfig::new(
            "hello.example.com",
            Origin::HelloWorld(HelloWorldOriginConfig {}),
            0,
            Duration::ZERO,
            0,
        ));

        let result = apply(&applier, &config).await;
        assert!(!result.success);
        assert_eq!(result.failed_configs.len(), 1);
        assert_eq!(
            result.failed_configs[0].config,
            SubConfig::ReverseProxy(config.reverse_proxy_configs[1].clone())
        );
        assert_eq!(
            result.failed_configs[0].reason,
            "Cannot apply ReverseProxyConfig, err: not implemented error"
        );
        // The healthy route is still served
        assert_eq!(applier.routes().await, vec!["app.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_edge_and_doh_failures_reported_separately() {
        let applier = AgentApplier::new();
        let mut config = valid_config(2);
        config.edge_connection_config.num_ha_connections = 9;
        config.doh_proxy_configs.push(DoHProxyConfig {
            listen_host: "not-an-ip".to_string(),
            listen_port: 53,
            upstreams: Vec::new(),
        });
        config.doh_proxy_configs.push(DoHProxyConfig {
            listen_host: "::1".to_string(),
            listen_port: 53,
            upstreams: vec!["http://8.8.8.8/dns-query".to_string()],
        });

        let result = apply(&applier, &config).await;
        let reasons: Vec<&str> = result
            .failed_configs
            .iter()
            .map(|f| f.reason.as_str())
            .collect();
        assert_eq!(
            reasons,
            vec![
                "Cannot apply EdgeConnectionConfig, err: number of HA connections must be between 1 and 4, got 9",
                "Cannot apply DoHProxyConfig, err: invalid listen address not-an-ip:53",
                "Cannot apply DoHProxyConfig, err: invalid upstream http://8.8.8.8/dns-query: upstream must use https",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_sub_configs_keep_last_good_value() {
        let applier = AgentApplier::new();
        let v1 = valid_config(1);
        apply(&applier, &v1).await;

        let mut v2 = valid_config(2);
        v2.edge_connection_config.num_ha_connections = 9;
        v2.doh_proxy_configs[0].upstreams = vec!["http://1.1.1.1/dns-query".to_string()];
        v2.reverse_proxy_configs[0].origin = Origin::HelloWorld(HelloWorldOriginConfig {});
        v2.supervisor_config.grace_period = Duration::from_secs(7);

        let result = apply(&applier, &v2).await;
        assert_eq!(result.failed_configs.len(), 3);

        let current = applier.current_config().await.unwrap();
        assert_eq!(current.version, Version(2));
        assert_eq!(current.supervisor_config, v2.supervisor_config);
        assert_eq!(current.edge_connection_config.num_ha_connections, 4);
        assert_eq!(current.doh_proxy_configs, v1.doh_proxy_configs);
        assert_eq!(current.reverse_proxy_configs, v1.reverse_proxy_configs);
        assert_eq!(applier.routes().await, vec!["app.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_new_route_is_not_kept() {
        let applier = AgentApplier::new();
        let mut config = valid_config(1);
        config.reverse_proxy_configs[0].origin = Origin::HelloWorld(HelloWorldOriginConfig {});

        apply(&applier, &config).await;
        let current = applier.current_config().await.unwrap();
        assert!(current.reverse_proxy_configs.is_empty());
        assert!(applier.routes().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_hostname() {
        let applier = AgentApplier::new();
        let mut config = valid_config(1);
        let duplicate = config.reverse_proxy_configs[0].clone();
        config.reverse_proxy_configs.push(duplicate);

        let result = apply(&applier, &config).await;
        assert_eq!(result.failed_configs.len(), 1);
        assert!(result.failed_configs[0]
            .reason
            .ends_with("duplicate tunnel hostname app.example.com"));
    }

    #[test]
    fn test_credential_must_exist() {
        let mut edge = valid_config(1).edge_connection_config;
        edge.user_credential_path = "/nonexistent/cert.pem".to_string();
        assert!(matches!(
            validate_edge(&edge),
            Err(ValidationError::Credential { .. })
        ));

        let file = tempfile::NamedTempFile::new().unwrap();
        edge.user_credential_path = file.path().to_str().unwrap().to_string();
        assert!(validate_edge(&edge).is_ok());
    }
}
