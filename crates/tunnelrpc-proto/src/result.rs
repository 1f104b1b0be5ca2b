//! Per-sub-config outcome of a `UseConfiguration` call
//!
//! The applier reports, for each sub-config of the pushed [`ClientConfig`],
//! whether it was applied. [`ResultBuilder`] turns those raw outcomes into a
//! wire-ready [`UseConfigurationResult`]: every failure becomes a
//! [`FailedConfig`] carrying a copy of the rejected sub-config and a formatted
//! reason.

use crate::config::{
    ClientConfig, DoHProxyConfig, EdgeConnectionConfig, ReverseProxyConfig, SubConfig,
    SupervisorConfig,
};
use crate::schema::{decode, decode_list, skip_unknown, WireStruct};
use crate::wire::{DecodeError, EncodeError, WireReader, WireWriter};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error reported by the applier for one sub-config
pub type ApplyError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of one `UseConfiguration` call
///
/// `success` is set by the applier and is independent of `failed_configs`:
/// an applier may report overall success while listing ignored failures, or
/// the reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseConfigurationResult {
    pub success: bool,
    #[serde(default)]
    pub failed_configs: Vec<FailedConfig>,
}

/// A sub-config that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedConfig {
    pub config: SubConfig,
    pub reason: String,
}

impl FailedConfig {
    /// Build the entry for `config` failing with `err`
    pub fn new(config: impl Into<SubConfig>, err: &dyn fmt::Display) -> Self {
        let config = config.into();
        let reason = config.fail_reason(err);
        Self { config, reason }
    }
}

/// Names one sub-config of a specific [`ClientConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubConfigRef {
    Supervisor,
    EdgeConnection,
    DoHProxy(usize),
    ReverseProxy(usize),
}

impl SubConfigRef {
    /// Look up the referenced sub-config, copying it out of `config`
    pub fn resolve(&self, config: &ClientConfig) -> Result<SubConfig, EncodeError> {
        match *self {
            SubConfigRef::Supervisor => Ok(config.supervisor_config.clone().into()),
            SubConfigRef::EdgeConnection => Ok(config.edge_connection_config.clone().into()),
            SubConfigRef::DoHProxy(index) => config
                .doh_proxy_configs
                .get(index)
                .cloned()
                .map(SubConfig::from)
                .ok_or(EncodeError::UnresolvedSubConfig {
                    kind: "DoHProxyConfig",
                    index,
                }),
            SubConfigRef::ReverseProxy(index) => config
                .reverse_proxy_configs
                .get(index)
                .cloned()
                .map(SubConfig::from)
                .ok_or(EncodeError::UnresolvedSubConfig {
                    kind: "ReverseProxyConfig",
                    index,
                }),
        }
    }

    /// Every sub-config present in `config`, in schema order
    pub fn all(config: &ClientConfig) -> Vec<SubConfigRef> {
        let mut refs = vec![SubConfigRef::Supervisor, SubConfigRef::EdgeConnection];
        refs.extend((0..config.doh_proxy_configs.len()).map(SubConfigRef::DoHProxy));
        refs.extend((0..config.reverse_proxy_configs.len()).map(SubConfigRef::ReverseProxy));
        refs
    }
}

impl fmt::Display for SubConfigRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubConfigRef::Supervisor => write!(f, "SupervisorConfig"),
            SubConfigRef::EdgeConnection => write!(f, "EdgeConnectionConfig"),
            SubConfigRef::DoHProxy(index) => write!(f, "DoHProxyConfig[{}]", index),
            SubConfigRef::ReverseProxy(index) => write!(f, "ReverseProxyConfig[{}]", index),
        }
    }
}

/// Whether one sub-config was applied
#[derive(Debug)]
pub struct ApplyOutcome {
    pub target: SubConfigRef,
    pub result: Result<(), ApplyError>,
}

impl ApplyOutcome {
    pub fn applied(target: SubConfigRef) -> Self {
        Self {
            target,
            result: Ok(()),
        }
    }

    pub fn failed(target: SubConfigRef, err: impl Into<ApplyError>) -> Self {
        Self {
            target,
            result: Err(err.into()),
        }
    }
}

/// Everything the applier has to say about one pushed configuration
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<ApplyOutcome>,
    /// Explicit overall verdict; `None` means "success iff nothing failed"
    pub success: Option<bool>,
}

impl ApplyReport {
    pub fn new(outcomes: Vec<ApplyOutcome>) -> Self {
        Self {
            outcomes,
            success: None,
        }
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }
}

/// Builds a [`UseConfigurationResult`] for one applied configuration
pub struct ResultBuilder<'a> {
    config: &'a ClientConfig,
    failed_configs: Vec<FailedConfig>,
    success: Option<bool>,
}

impl<'a> ResultBuilder<'a> {
    pub fn new(config: &'a ClientConfig) -> Self {
        Self {
            config,
            failed_configs: Vec::new(),
            success: None,
        }
    }

    /// Record a local failure of the referenced sub-config
    pub fn fail(
        &mut self,
        target: SubConfigRef,
        err: &dyn fmt::Display,
    ) -> Result<&mut Self, EncodeError> {
        let config = target.resolve(self.config)?;
        self.failed_configs.push(FailedConfig::new(config, err));
        Ok(self)
    }

    /// Record an outcome; applied sub-configs leave no trace in the result
    pub fn record(&mut self, outcome: &ApplyOutcome) -> Result<&mut Self, EncodeError> {
        if let Err(err) = &outcome.result {
            self.fail(outcome.target, err)?;
        }
        Ok(self)
    }

    pub fn success(&mut self, success: bool) -> &mut Self {
        self.success = Some(success);
        self
    }

    pub fn build(self) -> UseConfigurationResult {
        let success = self.success.unwrap_or(self.failed_configs.is_empty());
        UseConfigurationResult {
            success,
            failed_configs: self.failed_configs,
        }
    }
}

impl UseConfigurationResult {
    /// Convert an applier report into the result returned to the caller
    pub fn from_report(config: &ClientConfig, report: &ApplyReport) -> Result<Self, EncodeError> {
        let mut builder = ResultBuilder::new(config);
        for outcome in &report.outcomes {
            builder.record(outcome)?;
        }
        if let Some(success) = report.success {
            builder.success(success);
        }
        Ok(builder.build())
    }
}

mod use_configuration_result {
    pub const SUCCESS: u16 = 0;
    pub const FAILED_CONFIGS: u16 = 1;
}

impl WireStruct for UseConfigurationResult {
    const NAME: &'static str = "UseConfigurationResult";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use use_configuration_result::*;

        w.put_bool(SUCCESS, self.success);
        w.put_struct_list(FAILED_CONFIGS, &self.failed_configs, |w, c| {
            c.encode_fields(w)
        })
        .map_err(|e| e.in_field("failedConfigs"))?;
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use use_configuration_result::*;

        let mut result = Self::default();
        while let Some(field) = r.next_field()? {
            match field.number {
                SUCCESS => result.success = field.value.into_bool("success")?,
                FAILED_CONFIGS => {
                    result.failed_configs = decode_list(field.value, "failedConfigs")?
                }
                number => skip_unknown(Self::NAME, number, &field.value),
            }
        }
        Ok(result)
    }
}

mod failed_config {
    pub const CONFIG: u16 = 0;
    pub const REASON: u16 = 1;

    pub const SUPERVISOR: u16 = 0;
    pub const EDGE_CONNECTION: u16 = 1;
    pub const DOH: u16 = 2;
    pub const REVERSE_PROXY: u16 = 3;
}

impl WireStruct for FailedConfig {
    const NAME: &'static str = "FailedConfig";

    fn encode_fields(&self, w: &mut WireWriter) -> Result<(), EncodeError> {
        use failed_config::*;

        let discriminant = match &self.config {
            SubConfig::Supervisor(_) => SUPERVISOR,
            SubConfig::EdgeConnection(_) => EDGE_CONNECTION,
            SubConfig::DoHProxy(_) => DOH,
            SubConfig::ReverseProxy(_) => REVERSE_PROXY,
        };
        w.put_union(CONFIG, discriminant, |w| match &self.config {
            SubConfig::Supervisor(c) => c.encode_fields(w),
            SubConfig::EdgeConnection(c) => c.encode_fields(w),
            SubConfig::DoHProxy(c) => c.encode_fields(w),
            SubConfig::ReverseProxy(c) => c.encode_fields(w),
        })
        .map_err(|e| e.in_field("config"))?;
        w.put_str(REASON, &self.reason)
            .map_err(|e| e.in_field("reason"))?;
        Ok(())
    }

    fn decode_fields(mut r: WireReader) -> Result<Self, DecodeError> {
        use failed_config::*;

        let mut config = None;
        let mut reason = String::new();
        while let Some(field) = r.next_field()? {
            match field.number {
                CONFIG => {
                    let (discriminant, payload) = field.value.into_union("config")?;
                    config = Some(
                        decode_sub_config(discriminant, payload)
                            .map_err(|e| e.in_field("config"))?,
                    );
                }
                REASON => reason = field.value.into_string("reason")?,
                number => skip_unknown(Self::NAME, number, &field.value),
            }
        }

        Ok(Self {
            config: config.ok_or(DecodeError::MissingField("config"))?,
            reason,
        })
    }
}

fn decode_sub_config(discriminant: u16, payload: Bytes) -> Result<SubConfig, DecodeError> {
    use failed_config::*;

    let config = match discriminant {
        SUPERVISOR => SubConfig::Supervisor(decode::<SupervisorConfig>(payload)?),
        EDGE_CONNECTION => SubConfig::EdgeConnection(decode::<EdgeConnectionConfig>(payload)?),
        DOH => SubConfig::DoHProxy(decode::<DoHProxyConfig>(payload)?),
        REVERSE_PROXY => SubConfig::ReverseProxy(decode::<ReverseProxyConfig>(payload)?),
        _ => {
            return Err(DecodeError::UnknownVariant {
                union: "config",
                discriminant,
            })
        }
    };
    Ok(config)
}
