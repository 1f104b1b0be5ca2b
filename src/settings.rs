//! Agent settings file
//!
//! YAML, every field optional:
//!
//! ```yaml
//! listen: 127.0.0.1:7844
//! log_level: debug
//! credential_dir: /var/lib/tunnelrpc
//! call_timeout: 30
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use tunnelrpc_login::transfer::{DEFAULT_LOGIN_URL, DEFAULT_STORE_URL};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Address the UseConfiguration service listens on
    pub listen: String,
    pub log_level: String,
    /// Credential directory; `~/.tunnelrpc` when unset
    pub credential_dir: Option<PathBuf>,
    pub login_url: String,
    pub store_url: String,
    /// Upper bound on one pushed configuration, used by `push`
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7844".to_string(),
            log_level: "info".to_string(),
            credential_dir: None,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            store_url: DEFAULT_STORE_URL.to_string(),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl AgentSettings {
    /// Load `path`, or the first default config file, or fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match tunnelrpc_login::find_default_config_path() {
                Some(path) => path,
                None => {
                    debug!("No settings file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings = Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults document
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Helper module for serializing Duration as seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
