//! Wire schema of the configuration model
//!
//! Each struct has a hand-written codec keyed by stable field numbers. The
//! numbers below are part of the compatibility contract with the control
//! plane: new fields get new numbers, existing numbers are never reused.

use crate::config::{
    ClientConfig, DoHProxyConfig, EdgeConnectionConfig, ReverseProxyConfig, SupervisorConfig,
    Version,
};
use crate::origin::{
    HelloWorldOriginConfig, HttpOriginConfig, Origin, OriginKind, WebSocketOriginConfig,
};
use crate::wire::{DecodeError, EncodeError, WireReader, WireType, WireValue, WireWriter};
use bytes::Bytes;
use tracing::trace;

/// A struct with a fixed field-to-number mapping
pub trait WireStruct: Sized {
    /// Schema name, used in log and error context
    const NAME: &'static str;

    fn encode_fields(&self, writer: &mut WireWriter) -> Result<(), EncodeError>;

    fn decode_fields(reader: WireReader) -> Result<Self, DecodeError>;
}

/// Encode a struct to its wire bytes
pub fn encode<T: WireStruct>(value: &T) -> Result<Bytes, EncodeError> {
    let mut writer = WireWriter::new();
    value.encode_fields(&mut writer)?;
    Ok(writer.finish())
}

/// Decode a struct from its wire bytes
pub fn decode<T: WireStruct>(buf: Bytes) -> Result<T, DecodeError> {
    T::decode_fields(WireReader::new(buf))
}

pub(crate) fn decode_list<T: WireStruct>(
    value: WireValue,
    field: &'static str,
) -> Result<Vec<T>, DecodeError> {
    value
        .into_list(field, WireType::Struct)?
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            decode::<T>(item).map_err(|e| DecodeError::Element {
                index,
                source: Box::new(e),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.in_field(field))
}

pub(crate) fn skip_unknown(schema: &'static str, number: u16, value: &WireValue) {
    trace!(
        schema,
        field = number,
        wire_type = ?value.wire_type(),
        "Skipping unknown field"
    );
}

mod client_config {
    pub const VERSION: u16 = 0;
    pub const SUPERVISOR_CONFIG: u16 = 1;
    pub const EDGE_CONNECTION_CONFIG: u16 = 2;
    pub const DOH_PROXY_CONFIGS: u16 = 3;
    pub const REVERSE_PROXY_CONFIGS: u16 = 4;
}

impl WireStruct for ClientConfig {
    const NAME: &'static str = "ClientConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use client_config::*;

        w.put_u64(VERSION, self.version.0);
        w.put_struct(SUPERVISOR_CONFIG, |w| self.supervisor_config.encode_fields(w))
            .map_err(|e| e.in_field("supervisorConfig"))?;
        w.put_struct(EDGE_CONNECTION_CONFIG, |w| {
            self.edge_connection_config.encode_fields(w)
        })
        .map_err(|e| e.in_field("edgeConnectionConfig"))?;
        w.put_struct_list(DOH_PROXY_CONFIGS, &self.doh_proxy_configs, |w, c| {
            c.encode_fields(w)
        })
        .map_err(|e| e.in_field("dohProxyConfigs"))?;
        w.put_struct_list(REVERSE_PROXY_CONFIGS, &self.reverse_proxy_configs, |w, c| {
            c.encode_fields(w)
        })
        .map_err(|e| e.in_field("reverseProxyConfigs"))?;
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use client_config::*;

        let mut version = Version::init();
        let mut supervisor_config = None;
        let mut edge_connection_config = None;
        let mut doh_proxy_configs = Vec::new();
        let mut reverse_proxy_configs = Vec::new();

        while let Some(field) = r.next_field()? {
            match field.number {
                VERSION => version = Version(field.value.into_u64("version")?),
                SUPERVISOR_CONFIG => {
                    let payload = field.value.into_struct("supervisorConfig")?;
                    supervisor_config = Some(
                        decode::<SupervisorConfig>(payload)
                            .map_err(|e| e.in_field("supervisorConfig"))?,
                    );
                }
                EDGE_CONNECTION_CONFIG => {
                    let payload = field.value.into_struct("edgeConnectionConfig")?;
                    edge_connection_config = Some(
                        decode::<EdgeConnectionConfig>(payload)
                            .map_err(|e| e.in_field("edgeConnectionConfig"))?,
                    );
                }
                DOH_PROXY_CONFIGS => {
                    doh_proxy_configs = decode_list(field.value, "dohProxyConfigs")?;
                }
                REVERSE_PROXY_CONFIGS => {
                    reverse_proxy_configs = decode_list(field.value, "reverseProxyConfigs")?;
                }
                number => skip_unknown(Self::NAME, number, &field.value),
            }
        }

        Ok(Self {
            version,
            supervisor_config: supervisor_config
                .ok_or(DecodeError::MissingField("supervisorConfig"))?,
            edge_connection_config: edge_connection_config
                .ok_or(DecodeError::MissingField("edgeConnectionConfig"))?,
            doh_proxy_configs,
            reverse_proxy_configs,
        })
    }
}

mod supervisor_config {
    pub const AUTO_UPDATE_FREQUENCY: u16 = 0;
    pub const METRICS_UPDATE_FREQUENCY: u16 = 1;
    pub const GRACE_PERIOD: u16 = 2;
}

impl WireStruct for SupervisorConfig {
    const NAME: &'static str = "SupervisorConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use supervisor_config::*;

        w.put_duration(AUTO_UPDATE_FREQUENCY, self.auto_update_frequency)
            .map_err(|e| e.in_field("autoUpdateFrequency"))?;
        w.put_duration(METRICS_UPDATE_FREQUENCY, self.metrics_update_frequency)
            .map_err(|e| e.in_field("metricsUpdateFrequency"))?;
        w.put_duration(GRACE_PERIOD, self.grace_period)
            .map_err(|e| e.in_field("gracePeriod"))?;
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use supervisor_config::*;

        let mut config = Self::default();
        while let Some(field) = r.next_field()? {
            match field.number {
                AUTO_UPDATE_FREQUENCY => {
                    config.auto_update_frequency =
                        field.value.into_duration("autoUpdateFrequency")?
                }
                METRICS_UPDATE_FREQUENCY => {
                    config.metrics_update_frequency =
                        field.value.into_duration("metricsUpdateFrequency")?
                }
                GRACE_PERIOD => config.grace_period = field.value.into_duration("gracePeriod")?,
                number => skip_unknown(Self::NAME, number, &field.value),
            }
        }
        Ok(config)
    }
}

mod edge_connection_config {
    pub const NUM_HA_CONNECTIONS: u16 = 0;
    pub const HEARTBEAT_INTERVAL: u16 = 1;
    pub const TIMEOUT: u16 = 2;
    pub const MAX_FAILED_HEARTBEATS: u16 = 3;
    pub const USER_CREDENTIAL_PATH: u16 = 4;
}

impl WireStruct for EdgeConnectionConfig {
    const NAME: &'static str = "EdgeConnectionConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use edge_connection_config::*;

        w.put_u8(NUM_HA_CONNECTIONS, self.num_ha_connections);
        w.put_duration(HEARTBEAT_INTERVAL, self.heartbeat_interval)
            .map_err(|e| e.in_field("heartbeatInterval"))?;
        w.put_duration(TIMEOUT, self.timeout)
            .map_err(|e| e.in_field("timeout"))?;
        w.put_u64(MAX_FAILED_HEARTBEATS, self.max_failed_heartbeats);
        w.put_str(USER_CREDENTIAL_PATH, &self.user_credential_path)
            .map_err(|e| e.in_field("userCredentialPath"))?;
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use edge_connection_config::*;

        let mut config = Self::default();
        while let Some(field) = r.next_field()? {
            match field.number {
                NUM_HA_CONNECTIONS => {
                    config.num_ha_connections = field.value.into_u8("numHAConnections")?
                }
                HEARTBEAT_INTERVAL => {
                    config.heartbeat_interval = field.value.into_duration("heartbeatInterval")?
                }
                TIMEOUT => config.timeout = field.value.into_duration("timeout")?,
                MAX_FAILED_HEARTBEATS => {
                    config.max_failed_heartbeats = field.value.into_u64("maxFailedHeartbeats")?
                }
                USER_CREDENTIAL_PATH => {
                    config.user_credential_path = field.value.into_string("userCredentialPath")?
                }
                number => skip_unknown(Self::NAME, number, &field.value),
            }
        }
        Ok(config)
    }
}

mod doh_proxy_config {
    pub const LISTEN_HOST: u16 = 0;
    pub const LISTEN_PORT: u16 = 1;
    pub const UPSTREAMS: u16 = 2;
}

impl WireStruct for DoHProxyConfig {
    const NAME: &'static str = "DoHProxyConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use doh_proxy_config::*;

        w.put_str(LISTEN_HOST, &self.listen_host)
            .map_err(|e| e.in_field("listenHost"))?;
        w.put_u16(LISTEN_PORT, self.listen_port);
        w.put_str_list(UPSTREAMS, &self.upstreams)
            .map_err(|e| e.in_field("upstreams"))?;
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use doh_proxy_config::*;

        let mut config = Self::default();
        while let Some(field) = r.next_field()? {
            match field.number {
                LISTEN_HOST => config.listen_host = field.value.into_string("listenHost")?,
                LISTEN_PORT => config.listen_port = field.value.into_u16("listenPort")?,
                UPSTREAMS => config.upstreams = field.value.into_string_list("upstreams")?,
                number => skip_unknown(Self::NAME, number, &field.value),
            }
        }
        Ok(config)
    }
}

mod reverse_proxy_config {
    pub const TUNNEL_HOSTNAME: u16 = 0;
    pub const ORIGIN: u16 = 1;
    pub const RETRIES: u16 = 2;
    pub const CONNECTION_TIMEOUT: u16 = 3;
    pub const COMPRESSION_QUALITY: u16 = 4;
}

impl WireStruct for ReverseProxyConfig {
    const NAME: &'static str = "ReverseProxyConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use reverse_proxy_config::*;

        w.put_str(TUNNEL_HOSTNAME, &self.tunnel_hostname)
            .map_err(|e| e.in_field("tunnelHostname"))?;
        w.put_union(ORIGIN, self.origin.kind() as u16, |w| match &self.origin {
            Origin::Http(config) => config.encode_fields(w),
            Origin::WebSocket(config) => config.encode_fields(w),
            Origin::HelloWorld(config) => config.encode_fields(w),
        })
        .map_err(|e| e.in_field("origin"))?;
        w.put_u64(RETRIES, self.retries);
        w.put_duration(CONNECTION_TIMEOUT, self.connection_timeout)
            .map_err(|e| e.in_field("connectionTimeout"))?;
        w.put_u64(COMPRESSION_QUALITY, self.compression_quality);
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use reverse_proxy_config::*;

        let mut tunnel_hostname = String::new();
        let mut origin = None;
        let mut retries = 0;
        let mut connection_timeout = Default::default();
        let mut compression_quality = 0;

        while let Some(field) = r.next_field()? {
            match field.number {
                TUNNEL_HOSTNAME => tunnel_hostname = field.value.into_string("tunnelHostname")?,
                ORIGIN => {
                    let (discriminant, payload) = field.value.into_union("origin")?;
                    origin = Some(
                        decode_origin(discriminant, payload).map_err(|e| e.in_field("origin"))?,
                    );
                }
                RETRIES => retries = field.value.into_u64("retries")?,
                CONNECTION_TIMEOUT => {
                    connection_timeout = field.value.into_duration("connectionTimeout")?
                }
                COMPRESSION_QUALITY => {
                    compression_quality = field.value.into_u64("compressionQuality")?
                }
                number => skip_unknown(Self::NAME, number, &field.value),
            }
        }

        Ok(Self {
            tunnel_hostname,
            origin: origin.ok_or(DecodeError::MissingField("origin"))?,
            retries,
            connection_timeout,
            compression_quality,
        })
    }
}

fn decode_origin(discriminant: u16, payload: Bytes) -> Result<Origin, DecodeError> {
    let origin = match OriginKind::try_from(discriminant)? {
        OriginKind::Http => Origin::Http(decode(payload)?),
        OriginKind::WebSocket => Origin::WebSocket(decode(payload)?),
        OriginKind::HelloWorld => Origin::HelloWorld(decode(payload)?),
    };
    Ok(origin)
}

mod http_origin_config {
    pub const URL_STRING: u16 = 0;
    pub const TCP_KEEP_ALIVE: u16 = 1;
    pub const DIAL_DUAL_STACK: u16 = 2;
    pub const TLS_HANDSHAKE_TIMEOUT: u16 = 3;
    pub const TLS_VERIFY: u16 = 4;
    pub const ORIGIN_CA_POOL: u16 = 5;
    pub const ORIGIN_SERVER_NAME: u16 = 6;
    pub const MAX_IDLE_CONNECTIONS: u16 = 7;
    pub const IDLE_CONNECTION_TIMEOUT: u16 = 8;
    pub const PROXY_CONNECTION_TIMEOUT: u16 = 9;
    pub const EXPECT_CONTINUE_TIMEOUT: u16 = 10;
    pub const CHUNKED_ENCODING: u16 = 11;
}

impl WireStruct for HttpOriginConfig {
    const NAME: &'static str = "HTTPOriginConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use http_origin_config::*;

        w.put_str(URL_STRING, &self.url_string)
            .map_err(|e| e.in_field("urlString"))?;
        w.put_duration(TCP_KEEP_ALIVE, self.tcp_keep_alive)
            .map_err(|e| e.in_field("tcpKeepAlive"))?;
        w.put_bool(DIAL_DUAL_STACK, self.dial_dual_stack);
        w.put_duration(TLS_HANDSHAKE_TIMEOUT, self.tls_handshake_timeout)
            .map_err(|e| e.in_field("tlsHandshakeTimeout"))?;
        w.put_bool(TLS_VERIFY, self.tls_verify);
        w.put_str(ORIGIN_CA_POOL, &self.origin_ca_pool)
            .map_err(|e| e.in_field("originCAPool"))?;
        w.put_str(ORIGIN_SERVER_NAME, &self.origin_server_name)
            .map_err(|e| e.in_field("originServerName"))?;
        w.put_u64(MAX_IDLE_CONNECTIONS, self.max_idle_connections);
        w.put_duration(IDLE_CONNECTION_TIMEOUT, self.idle_connection_timeout)
            .map_err(|e| e.in_field("idleConnectionTimeout"))?;
        w.put_duration(PROXY_CONNECTION_TIMEOUT, self.proxy_connection_timeout)
            .map_err(|e| e.in_field("proxyConnectionTimeout"))?;
        w.put_duration(EXPECT_CONTINUE_TIMEOUT, self.expect_continue_timeout)
            .map_err(|e| e.in_field("expectContinueTimeout"))?;
        w.put_bool(CHUNKED_ENCODING, self.chunked_encoding);
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use http_origin_config::*;

        let mut config = Self::default();
        while let Some(field) = r.next_field()? {
            let value = field.value;
            match field.number {
                URL_STRING => config.url_string = value.into_string("urlString")?,
                TCP_KEEP_ALIVE => config.tcp_keep_alive = value.into_duration("tcpKeepAlive")?,
                DIAL_DUAL_STACK => config.dial_dual_stack = value.into_bool("dialDualStack")?,
                TLS_HANDSHAKE_TIMEOUT => {
                    config.tls_handshake_timeout = value.into_duration("tlsHandshakeTimeout")?
                }
                TLS_VERIFY => config.tls_verify = value.into_bool("tlsVerify")?,
                ORIGIN_CA_POOL => config.origin_ca_pool = value.into_string("originCAPool")?,
                ORIGIN_SERVER_NAME => {
                    config.origin_server_name = value.into_string("originServerName")?
                }
                MAX_IDLE_CONNECTIONS => {
                    config.max_idle_connections = value.into_u64("maxIdleConnections")?
                }
                IDLE_CONNECTION_TIMEOUT => {
                    config.idle_connection_timeout = value.into_duration("idleConnectionTimeout")?
                }
                PROXY_CONNECTION_TIMEOUT => {
                    config.proxy_connection_timeout =
                        value.into_duration("proxyConnectionTimeout")?
                }
                EXPECT_CONTINUE_TIMEOUT => {
                    config.expect_continue_timeout = value.into_duration("expectContinueTimeout")?
                }
                CHUNKED_ENCODING => config.chunked_encoding = value.into_bool("chunkedEncoding")?,
                number => skip_unknown(Self::NAME, number, &value),
            }
        }
        Ok(config)
    }
}

mod websocket_origin_config {
    pub const URL_STRING: u16 = 0;
    pub const TLS_VERIFY: u16 = 1;
    pub const ORIGIN_CA_POOL: u16 = 2;
    pub const ORIGIN_SERVER_NAME: u16 = 3;
}

impl WireStruct for WebSocketOriginConfig {
    const NAME: &'static str = "WebSocketOriginConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use websocket_origin_config::*;

        w.put_str(URL_STRING, &self.url_string)
            .map_err(|e| e.in_field("urlString"))?;
        w.put_bool(TLS_VERIFY, self.tls_verify);
        w.put_str(ORIGIN_CA_POOL, &self.origin_ca_pool)
            .map_err(|e| e.in_field("originCAPool"))?;
        w.put_str(ORIGIN_SERVER_NAME, &self.origin_server_name)
            .map_err(|e| e.in_field("originServerName"))?;
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use websocket_origin_config::*;

        let mut config = Self::default();
        while let Some(field) = r.next_field()? {
            let value = field.value;
            match field.number {
                URL_STRING => config.url_string = value.into_string("urlString")?,
                TLS_VERIFY => config.tls_verify = value.into_bool("tlsVerify")?,
                ORIGIN_CA_POOL => config.origin_ca_pool = value.into_string("originCAPool")?,
                ORIGIN_SERVER_NAME => {
                    config.origin_server_name = value.into_string("originServerName")?
                }
                number => skip_unknown(Self::NAME, number, &value),
            }
        }
        Ok(config)
    }
}

impl WireStruct for HelloWorldOriginConfig {
    const NAME: &'static str = "HelloWorldOriginConfig";

    fn encode_fields(&self, _w: &mut WireWriter) -> Result<(), EncodeError> {
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        while let Some(field) = r.next_field()? {
            skip_unknown(Self::NAME, field.number, &field.value);
        }
        Ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn http_route(hostname: &str) -> ReverseProxyConfig {
        ReverseProxyConfig::new(
            hostname,
            Origin::Http(HttpOriginConfig {
                url_string: "http://localhost:8080".to_string(),
                ..Default::default()
            }),
            3,
            Duration::ZERO,
            0,
        )
    }

    fn full_config() -> ClientConfig {
        ClientConfig {
            version: Version(12),
            supervisor_config: SupervisorConfig {
                auto_update_frequency: Duration::from_secs(86_400),
                metrics_update_frequency: Duration::from_secs(5),
                grace_period: Duration::from_secs(30),
            },
            edge_connection_config: EdgeConnectionConfig {
                num_ha_connections: 4,
                heartbeat_interval: Duration::from_secs(5),
                timeout: Duration::from_secs(60),
                max_failed_heartbeats: 5,
                user_credential_path: "/etc/tunnelrpc/cert.pem".to_string(),
            },
            doh_proxy_configs: vec![DoHProxyConfig {
                listen_host: "127.0.0.1".to_string(),
                listen_port: 53,
                upstreams: vec![
                    "https://1.1.1.1/dns-query".to_string(),
                    "https://1.0.0.1/dns-query".to_string(),
                ],
            }],
            reverse_proxy_configs: vec![
                ReverseProxyConfig::new(
                    "api.example.com",
                    Origin::Http(HttpOriginConfig {
                        url_string: "https://10.0.0.5:8443".to_string(),
                        tcp_keep_alive: Duration::from_secs(30),
                        dial_dual_stack: true,
                        tls_handshake_timeout: Duration::from_secs(10),
                        tls_verify: true,
                        origin_ca_pool: "/etc/ssl/origin-ca.pem".to_string(),
                        origin_server_name: "api.internal".to_string(),
                        max_idle_connections: 100,
                        idle_connection_timeout: Duration::from_secs(90),
                        proxy_connection_timeout: Duration::from_secs(30),
                        expect_continue_timeout: Duration::from_secs(1),
                        chunked_encoding: true,
                    }),
                    5,
                    Duration::from_secs(30),
                    2,
                ),
                ReverseProxyConfig::new(
                    "ws.example.com",
                    Origin::WebSocket(WebSocketOriginConfig {
                        url_string: "ws://localhost:9000".to_string(),
                        tls_verify: false,
                        origin_ca_pool: String::new(),
                        origin_server_name: "ws.internal".to_string(),
                    }),
                    1,
                    Duration::from_millis(1500),
                    0,
                ),
                ReverseProxyConfig::new(
                    "hello.example.com",
                    Origin::HelloWorld(HelloWorldOriginConfig {}),
                    0,
                    Duration::ZERO,
                    0,
                ),
            ],
        }
    }

    #[test]
    fn test_minimal_route_round_trip() {
        let config = ClientConfig {
            version: Version(5),
            reverse_proxy_configs: vec![http_route("a.example.com")],
            ..Default::default()
        };

        let bytes = encode(&config).unwrap();
        let decoded: ClientConfig = decode(bytes).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_full_config_round_trip() {
        let config = full_config();
        let decoded: ClientConfig = decode(encode(&config).unwrap()).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_empty_lists_round_trip() {
        let config = ClientConfig::default();
        let decoded: ClientConfig = decode(encode(&config).unwrap()).unwrap();
        assert!(decoded.doh_proxy_configs.is_empty());
        assert!(decoded.reverse_proxy_configs.is_empty());
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_each_origin_variant_round_trip() {
        for route in full_config().reverse_proxy_configs {
            let decoded: ReverseProxyConfig = decode(encode(&route).unwrap()).unwrap();
            assert_eq!(decoded.origin.kind(), route.origin.kind());
            assert_eq!(decoded, route);
        }
    }

    #[test]
    fn test_missing_origin_rejected() {
        let mut w = WireWriter::new();
        w.put_str(reverse_proxy_config::TUNNEL_HOSTNAME, "a.example.com")
            .unwrap();
        w.put_u64(reverse_proxy_config::RETRIES, 3);

        let err = decode::<ReverseProxyConfig>(w.finish()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("origin")));
    }

    #[test]
    fn test_missing_origin_fails_whole_client_config() {
        let mut route = WireWriter::new();
        route
            .put_str(reverse_proxy_config::TUNNEL_HOSTNAME, "a.example.com")
            .unwrap();
        let route = route.finish();

        let mut w = WireWriter::new();
        w.put_u64(client_config::VERSION, 1);
        w.put_struct(client_config::SUPERVISOR_CONFIG, |_| Ok(()))
            .unwrap();
        w.put_struct(client_config::EDGE_CONNECTION_CONFIG, |_| Ok(()))
            .unwrap();
        w.put_struct_list(client_config::REVERSE_PROXY_CONFIGS, &[route], |w, _| {
            w.put_str(reverse_proxy_config::TUNNEL_HOSTNAME, "a.example.com")
        })
        .unwrap();

        let err = decode::<ClientConfig>(w.finish()).unwrap_err();
        assert!(matches!(err.root_cause(), DecodeError::MissingField("origin")));
        assert!(err.to_string().contains("reverseProxyConfigs"));
        assert!(err.to_string().contains("element 0"));
    }

    #[test]
    fn test_unknown_origin_discriminant_rejected() {
        let mut w = WireWriter::new();
        w.put_str(reverse_proxy_config::TUNNEL_HOSTNAME, "a.example.com")
            .unwrap();
        w.put_union(reverse_proxy_config::ORIGIN, 9, |_| Ok(()))
            .unwrap();

        let err = decode::<ReverseProxyConfig>(w.finish()).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            DecodeError::UnknownVariant {
                union: "origin",
                discriminant: 9
            }
        ));
    }

    #[test]
    fn test_missing_supervisor_rejected() {
        let mut w = WireWriter::new();
        w.put_u64(client_config::VERSION, 1);
        w.put_struct(client_config::EDGE_CONNECTION_CONFIG, |_| Ok(()))
            .unwrap();

        let err = decode::<ClientConfig>(w.finish()).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("supervisorConfig")));
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let doh = DoHProxyConfig {
            listen_host: "localhost".to_string(),
            listen_port: 5053,
            upstreams: vec!["https://dns.example/dns-query".to_string()],
        };

        let mut w = WireWriter::new();
        doh.encode_fields(&mut w).unwrap();
        // A field appended by a newer peer
        w.put_str(40, "future").unwrap();
        w.put_struct_list(41, &[1u64, 2], |w, v| {
            w.put_u64(0, *v);
            Ok(())
        })
        .unwrap();

        let decoded: DoHProxyConfig = decode(w.finish()).unwrap();
        assert_eq!(decoded, doh);
    }

    #[test]
    fn test_missing_scalars_decode_as_zero() {
        let mut w = WireWriter::new();
        w.put_str(edge_connection_config::USER_CREDENTIAL_PATH, "/cert.pem")
            .unwrap();

        let decoded: EdgeConnectionConfig = decode(w.finish()).unwrap();
        assert_eq!(decoded.num_ha_connections, 0);
        assert_eq!(decoded.heartbeat_interval, Duration::ZERO);
        assert_eq!(decoded.user_credential_path, "/cert.pem");
    }

    #[test]
    fn test_encode_error_reports_route_index() {
        let mut config = full_config();
        config.reverse_proxy_configs[1].connection_timeout = Duration::MAX;

        let err = encode(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("reverseProxyConfigs"), "{message}");
        assert!(message.contains("element 1"), "{message}");
        assert!(message.contains("connectionTimeout"), "{message}");
    }

    #[test]
    fn test_decode_error_reports_list_index() {
        let mut w = WireWriter::new();
        w.put_struct(client_config::SUPERVISOR_CONFIG, |_| Ok(()))
            .unwrap();
        w.put_struct(client_config::EDGE_CONNECTION_CONFIG, |_| Ok(()))
            .unwrap();
        w.put_struct_list(client_config::DOH_PROXY_CONFIGS, &[0u16, 1], |w, i| {
            if *i == 1 {
                // listenPort with the wrong wire type
                w.put_u64(doh_proxy_config::LISTEN_PORT, 53);
            }
            Ok(())
        })
        .unwrap();

        let err = decode::<ClientConfig>(w.finish()).unwrap_err();
        match err {
            DecodeError::Field { field, source } => {
                assert_eq!(field, "dohProxyConfigs");
                assert!(matches!(*source, DecodeError::Element { index: 1, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
