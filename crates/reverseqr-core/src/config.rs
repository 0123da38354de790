//! Configuration resolution for ReverseQR.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/reverseqr/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete ReverseQR client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub receive: ReceiveConfig,
    #[serde(default)]
    pub wordlists: WordlistConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            signaling: SignalingConfig::default(),
            receive: ReceiveConfig::default(),
            wordlists: WordlistConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Relay endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the relay HTTP API (e.g., "<https://reverseqr.example>").
    pub url: String,
    /// Notification channel URL. Derived from `url` when unset.
    pub ws_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
            ws_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl RelayConfig {
    /// Notification channel URL: `ws_url`, or `url` with the scheme swapped
    /// (`http` → `ws`, `https` → `wss`).
    pub fn notification_url(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.clone();
        }
        let base = self.url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        }
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Pairing and notification channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// How long to wait for the peer's public key after joining (seconds).
    pub peer_key_timeout_secs: u64,
    /// Fixed delay before reconnecting a dropped notification channel (ms).
    pub reconnect_delay_ms: u64,
    /// Maximum reconnect attempts (None = unlimited).
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            peer_key_timeout_secs: 60,
            reconnect_delay_ms: 2000,
            max_reconnect_attempts: None,
        }
    }
}

impl SignalingConfig {
    pub const fn peer_key_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_key_timeout_secs)
    }

    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Receive-side settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    /// Also poll the retrieval endpoint on this interval (seconds).
    pub poll_interval_secs: Option<u64>,
}

/// Optional replacements for the bundled wordlists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WordlistConfig {
    pub code_path: Option<PathBuf>,
    pub phrase_path: Option<PathBuf>,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            config = load_config_file(&global_path)?;
        }
    }

    // Explicit file replaces the global one; it must exist
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        config = load_config_file(path)?;
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("reverseqr").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("REVERSEQR_RELAY_URL") {
        config.relay.url = val;
    }
    if let Some(val) = var("REVERSEQR_WS_URL") {
        config.relay.ws_url = Some(val);
    }
    if let Some(val) = var("REVERSEQR_PEER_KEY_TIMEOUT") {
        if let Ok(n) = val.parse() {
            config.signaling.peer_key_timeout_secs = n;
        }
    }
    if let Some(val) = var("REVERSEQR_LOG_LEVEL") {
        config.log_level = val;
    }
}
