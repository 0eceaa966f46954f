//! Configuration loading and persistence.
//!
//! Handles reading and writing the sockbridge configuration file and
//! applying `SOCKBRIDGE_*` environment overrides on top of it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants;
use crate::error::ConfigError;
use crate::tls::TrustPolicy;

/// Outbound connection policy.
///
/// Connections refused here are reported to the host as permission
/// denials without touching the network.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectPolicy {
    /// Hosts scripts may connect to. Empty means any host.
    pub allowed_hosts: Vec<String>,
    /// Ports scripts may never connect to.
    pub denied_ports: Vec<u16>,
}

impl ConnectPolicy {
    /// Returns `Err(detail)` when the target is refused.
    pub fn check(&self, host: &str, port: u16) -> std::result::Result<(), String> {
        if !self.allowed_hosts.is_empty()
            && !self
                .allowed_hosts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
        {
            return Err(format!("host {host} is not in the allowed host list"));
        }
        if self.denied_ports.contains(&port) {
            return Err(format!("port {port} is denied"));
        }
        Ok(())
    }
}

/// Configuration for the socket bridge.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Listener read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Listener read buffer size in bytes.
    pub read_buffer_size: usize,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// TLS handshake timeout in milliseconds; 0 means no timeout.
    pub handshake_timeout_ms: u64,
    /// How long the executor waits for a certificate decision.
    pub cert_prompt_timeout_ms: u64,
    /// Encoding used when a connection does not name one.
    pub default_encoding: String,
    /// Trust policy used when the `certTrustPolicy` attribute is unset.
    pub default_trust_policy: TrustPolicy,
    /// Enable the submitter fairness gate in front of the executor.
    pub fairness_gate: bool,
    /// Outbound connection policy.
    pub policy: ConnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout_ms: constants::DEFAULT_READ_TIMEOUT_MS,
            read_buffer_size: constants::DEFAULT_READ_BUFFER_SIZE,
            connect_timeout_ms: constants::DEFAULT_CONNECT_TIMEOUT_MS,
            handshake_timeout_ms: constants::DEFAULT_HANDSHAKE_TIMEOUT_MS,
            cert_prompt_timeout_ms: constants::DEFAULT_CERT_PROMPT_TIMEOUT_MS,
            default_encoding: constants::DEFAULT_ENCODING.to_string(),
            default_trust_policy: TrustPolicy::Strict,
            fairness_gate: false,
            policy: ConnectPolicy::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `SOCKBRIDGE_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("SOCKBRIDGE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("sockbridge")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from the default file, with environment overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            match Self::read_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring config file {}: {}", path.display(), e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a specific file, with environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn read_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persists the configuration as pretty JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    ///
    /// Unparseable values are ignored and the current value is kept.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SOCKBRIDGE_READ_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.read_timeout_ms = v;
        }
        if let Some(v) = lookup("SOCKBRIDGE_READ_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
            self.read_buffer_size = v;
        }
        if let Some(v) = lookup("SOCKBRIDGE_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = lookup("SOCKBRIDGE_HANDSHAKE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.handshake_timeout_ms = v;
        }
        if let Some(v) = lookup("SOCKBRIDGE_CERT_PROMPT_TIMEOUT_MS").and_then(|v| v.parse().ok())
        {
            self.cert_prompt_timeout_ms = v;
        }
        if let Some(v) = lookup("SOCKBRIDGE_ENCODING") {
            self.default_encoding = v;
        }
        if let Some(v) = lookup("SOCKBRIDGE_TRUST_POLICY") {
            match v.parse::<TrustPolicy>() {
                Ok(policy) => self.default_trust_policy = policy,
                Err(e) => log::warn!("Ignoring SOCKBRIDGE_TRUST_POLICY: {}", e),
            }
        }
        if let Some(v) = lookup("SOCKBRIDGE_FAIRNESS_GATE") {
            self.fairness_gate = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
    }

    /// Listener read timeout. Never zero, since a zero socket timeout
    /// means "block forever".
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// TCP connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    /// TLS handshake timeout, `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms))
    }

    /// Certificate prompt timeout.
    pub fn cert_prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.cert_prompt_timeout_ms)
    }

    /// Read buffer size, at least one byte.
    pub fn buffer_size(&self) -> usize {
        self.read_buffer_size.max(1)
    }
}
