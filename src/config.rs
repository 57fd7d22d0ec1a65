//! Dashboard client configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main configuration for the oracle client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// REST base, e.g. `http://localhost:8000`
    pub api_base_url: String,

    /// WebSocket base, e.g. `ws://localhost:8000`
    pub ws_base_url: String,

    /// Per-request timeout for pulls and writes
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// How long a live channel gets to shut down before its task is aborted
    #[serde(with = "duration_serde")]
    pub channel_close_timeout: Duration,

    /// Block-explorer prefix for published transactions
    pub explorer_tx_base: String,

    /// Size of the "most recent" audit view
    pub recent_entries: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".into(),
            ws_base_url: "ws://localhost:8000".into(),
            request_timeout: Duration::from_secs(30),
            channel_close_timeout: Duration::from_secs(2),
            explorer_tx_base: "https://sepolia.etherscan.io/tx".into(),
            recent_entries: 5,
        }
    }
}

impl DashboardConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(url) = non_empty_var("ORACLE_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = non_empty_var("ORACLE_WS_URL") {
            self.ws_base_url = url;
        }
        if let Some(raw) = non_empty_var("ORACLE_REQUEST_TIMEOUT_MS") {
            let ms = raw
                .parse::<u64>()
                .context("Invalid ORACLE_REQUEST_TIMEOUT_MS")?;
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(base) = non_empty_var("ORACLE_EXPLORER_TX_BASE") {
            self.explorer_tx_base = base;
        }
        Ok(())
    }

    /// WebSocket base derived from the REST base when only that is known.
    pub fn with_api_base(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self.ws_base_url = derive_ws_base(&self.api_base_url);
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn derive_ws_base(api_base_url: &str) -> String {
    if let Some(rest) = api_base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_base_url.to_string()
    }
}

// Serde helper for Duration (using milliseconds for simplicity)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
