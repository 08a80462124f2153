//! Configuration system for timeoutd.
//!
//! Resolution order: defaults → config file → environment variables.
//! Command-line flags are applied on top by the daemon.
//!
//! Config file location:
//!   1. $TIMEOUTD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/timeoutd/config.toml
//!   3. ~/.config/timeoutd/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::crypto::KEY_LENGTH;
use crate::wire::{
    DEFAULT_TIMEOUT_SECS, MULTICAST_GROUP, SIGNED_PORT, SIMPLE_PORT, TIMESTAMP_SLACK_SECS,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutdConfig {
    pub scheduler: SchedulerConfig,
    pub protocol: ProtocolConfig,
    pub sender: SenderConfig,
    pub multicast: MulticastConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tracked keys. New keys beyond this are dropped.
    pub entry_limit: usize,
    /// Notification worker count.
    pub workers: usize,
    /// Executable run as `<script> <key> <last address>` on expiry.
    pub notify_script: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub simple_port: u16,
    pub signed_port: u16,
    /// Accepted distance between packet timestamp and local time.
    pub timestamp_slack_secs: u64,
    /// Timeout used when a payload has no `:timeout` suffix.
    pub default_timeout_secs: i32,
    /// Pre-shared keys, at most 32 bytes each. Non-empty enables signed mode.
    pub preshared_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Key announced to peers. None = `node.<hostname>`.
    pub key: Option<String>,
    /// Seconds between keepalives.
    pub frequency_secs: u64,
    /// Timeout announced in each keepalive.
    pub timeout_secs: i32,
    /// Peer hosts or addresses.
    pub peers: Vec<String>,
    /// Files listing one peer per line.
    pub peer_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    pub enabled: bool,
    /// IPv4 multicast TTL. 5 covers site → firewall → VPN → firewall → site.
    pub ttl: u32,
    pub group: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            entry_limit: 200,
            workers: 4,
            notify_script: PathBuf::from("/usr/libexec/timeoutd/timeoutd-notify"),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            simple_port: SIMPLE_PORT,
            signed_port: SIGNED_PORT,
            timestamp_slack_secs: TIMESTAMP_SLACK_SECS,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            preshared_keys: Vec::new(),
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            key: None,
            frequency_secs: 2,
            timeout_secs: 10,
            peers: Vec::new(),
            peer_files: Vec::new(),
        }
    }
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: 5,
            group: MULTICAST_GROUP.to_string(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("timeoutd")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TimeoutdConfig {
    /// Load config: defaults → file → env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::file_path())
    }

    /// Load from an explicit path. A missing file yields defaults.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TimeoutdConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TIMEOUTD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply TIMEOUTD_* and SIGNATURE_KEY overrides from `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SIGNATURE_KEY") {
            self.protocol.preshared_keys.push(v);
        }
        if let Some(v) = lookup("TIMEOUTD_SCHEDULER__ENTRY_LIMIT") {
            if let Ok(n) = v.parse() {
                self.scheduler.entry_limit = n;
            }
        }
        if let Some(v) = lookup("TIMEOUTD_SCHEDULER__NOTIFY_SCRIPT") {
            self.scheduler.notify_script = PathBuf::from(v);
        }
        if let Some(v) = lookup("TIMEOUTD_MULTICAST__ENABLED") {
            self.multicast.enabled = v == "true" || v == "1";
        }
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.entry_limit == 0 {
            return Err(ConfigError::Invalid("entry limit must be at least 1".into()));
        }
        if self.scheduler.workers == 0 {
            return Err(ConfigError::Invalid("worker count must be at least 1".into()));
        }
        if self.sender.frequency_secs == 0 {
            return Err(ConfigError::Invalid("sender frequency must be positive".into()));
        }
        if self.sender.timeout_secs <= 0 {
            return Err(ConfigError::Invalid("sender timeout must be positive".into()));
        }
        // A zero default would turn every bare-key keepalive into a cancel.
        if self.protocol.default_timeout_secs <= 0 {
            return Err(ConfigError::Invalid("default timeout must be positive".into()));
        }
        if self.multicast.ttl == 0 {
            return Err(ConfigError::Invalid("multicast TTL must be positive".into()));
        }
        if let Some(key) = self
            .protocol
            .preshared_keys
            .iter()
            .find(|k| k.is_empty() || k.len() > KEY_LENGTH)
        {
            return Err(ConfigError::Invalid(format!(
                "pre-shared key of {} bytes, expected 1..={}",
                key.len(),
                KEY_LENGTH
            )));
        }
        Ok(())
    }

    /// Signed mode is on whenever at least one key is configured.
    pub fn signed(&self) -> bool {
        !self.protocol.preshared_keys.is_empty()
    }
}
