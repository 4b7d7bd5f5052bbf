//! Configuration loading and persistence.
//!
//! Reads `config.json` from the aria2-rpc config directory, then applies
//! environment overrides. The rpc secret is never written to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::buffer_pool::{DEFAULT_MAX_IDLE, DEFAULT_MAX_POOLED_CAPACITY};
use crate::client::ClientOptions;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the aria2-rpc client and CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// JSON-RPC endpoint (`ws://`, `wss://`, `http://` or `https://`).
    pub rpc_url: String,
    /// aria2 `--rpc-secret` - NOT serialized to disk.
    #[serde(skip)]
    pub secret: Option<String>,
    /// Per-call deadline in milliseconds. 0 disables the deadline.
    pub timeout_ms: u64,
    /// Frame buffers above this capacity are not pooled.
    pub max_pooled_buffer: usize,
    /// Maximum idle frame buffers.
    pub max_idle_buffers: usize,
    /// Cap on simultaneously running event callbacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_concurrency: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "ws://localhost:6800/jsonrpc".to_string(),
            secret: None,
            timeout_ms: 30_000,
            max_pooled_buffer: DEFAULT_MAX_POOLED_CAPACITY,
            max_idle_buffers: DEFAULT_MAX_IDLE,
            callback_concurrency: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `ARIA2_RPC_CONFIG_DIR` overrides the platform config directory
    /// (Linux: `~/.config/aria2-rpc`).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = match std::env::var("ARIA2_RPC_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("aria2-rpc"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let dir = Self::config_dir()?;
        let mut config = Self::load_from(&dir).unwrap_or_else(|err| {
            log::debug!("using default config: {err:#}");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir` without overrides.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        let content = fs::read_to_string(&config_path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `ARIA2_RPC_URL`, `ARIA2_RPC_SECRET` and `ARIA2_RPC_TIMEOUT_MS`
    /// as looked up by `lookup`. Unparseable numbers are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ARIA2_RPC_URL") {
            self.rpc_url = url;
        }

        if let Some(secret) = lookup("ARIA2_RPC_SECRET") {
            self.secret = Some(secret);
        }

        if let Some(timeout) = lookup("ARIA2_RPC_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => self.timeout_ms = ms,
                Err(err) => log::warn!("ignoring ARIA2_RPC_TIMEOUT_MS={timeout}: {err}"),
            }
        }
    }

    /// Persists the current configuration to disk.
    /// Note: the secret is NOT saved.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Writes `config.json` into `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let config_path = dir.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Per-call deadline, `None` when `timeout_ms` is 0.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Client options derived from this configuration.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            secret: self.secret.clone(),
            call_timeout: self.call_timeout(),
            max_pooled_buffer: self.max_pooled_buffer,
            max_idle_buffers: self.max_idle_buffers,
            callback_concurrency: self.callback_concurrency,
            ..ClientOptions::default()
        }
    }
}
