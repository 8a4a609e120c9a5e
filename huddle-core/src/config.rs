// ABOUTME: Configuration parsing from TOML file with environment variable overrides.
// ABOUTME: Every field has a sensible default; a missing file yields a default config.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// WebSocket endpoint of the relay.
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Identity announced to the relay.
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Channels joined on connect.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 0 = retry forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ring-buffer capacity of the message log.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// How many recent authoritative records each reconcile pass scans.
    #[serde(default = "default_reconcile_window")]
    pub reconcile_window: usize,
    /// TTL for cached roster query results, in seconds.
    #[serde(default = "default_roster_ttl_secs")]
    pub roster_ttl_secs: u64,
    #[serde(default = "default_roster_cache_capacity")]
    pub roster_cache_capacity: usize,
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:3888/ws".to_string()
}

fn default_username() -> String {
    "You".to_string()
}

fn default_channels() -> Vec<String> {
    vec!["general".to_string()]
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_history_limit() -> usize {
    2000
}

fn default_reconcile_window() -> usize {
    50
}

fn default_roster_ttl_secs() -> u64 {
    30
}

fn default_roster_cache_capacity() -> usize {
    128
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            username: default_username(),
            avatar_url: None,
            channels: default_channels(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            reconcile_window: default_reconcile_window(),
            roster_ttl_secs: default_roster_ttl_secs(),
            roster_cache_capacity: default_roster_cache_capacity(),
        }
    }
}

impl LinkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Missing config file falls back to defaults (plus env overrides);
    /// a present-but-broken file is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HUDDLE_RELAY_URL") {
            self.relay.url = url;
        }
        if let Ok(username) = std::env::var("HUDDLE_USERNAME") {
            self.relay.username = username;
        }
        if let Ok(channels) = std::env::var("HUDDLE_CHANNELS") {
            self.relay.channels = channels
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
