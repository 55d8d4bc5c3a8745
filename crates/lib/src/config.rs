//! Configuration types and loading.
//!
//! Config is loaded from a YAML or JSON file (e.g. `~/.buddy/config.yaml`) and environment.
//! Only the dispatch engine's own settings live here; transports, agents and actions
//! are configured by whoever constructs them.

use crate::runner::{
    RunnerOptions, DEFAULT_ACTION_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Dispatch engine settings.
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Runner timeouts and sender policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Per-message deadline in seconds (default 900). 0 disables it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-action deadline in seconds (default 120). 0 disables it; the request deadline still applies.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    /// Only these senders are served. Empty allows everyone.
    #[serde(default)]
    pub allowed_senders: Vec<String>,

    /// Cap on reply length in characters. 0 means no cap.
    #[serde(default)]
    pub max_reply_chars: usize,

    /// Seconds in-flight work may keep running after shutdown (default 30). 0 interrupts it at once.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_action_timeout_secs() -> u64 {
    DEFAULT_ACTION_TIMEOUT.as_secs()
}

fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE.as_secs()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            allowed_senders: Vec::new(),
            max_reply_chars: 0,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl RunnerConfig {
    pub fn options(&self) -> RunnerOptions {
        RunnerOptions {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            action_timeout: Duration::from_secs(self.action_timeout_secs),
            allowed_senders: self
                .allowed_senders
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            max_reply_chars: self.max_reply_chars,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("BUDDY_CONFIG_PATH")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".buddy").join("config.yaml"))
                .unwrap_or_else(|| PathBuf::from("config.yaml"))
        })
}

/// Parse config text. `.json` files are JSON; anything else is YAML.
pub fn parse_config(text: &str, path: &Path) -> Result<Config> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(text).with_context(|| format!("parsing config from {}", path.display()))
    } else if text.trim().is_empty() {
        Ok(Config::default())
    } else {
        serde_yaml::from_str(text).with_context(|| format!("parsing config from {}", path.display()))
    }
}

/// Load config from the given path, or the default path (or BUDDY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        parse_config(&s, &path)?
    };
    Ok((config, path))
}
