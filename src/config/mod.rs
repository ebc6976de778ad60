//! Agent configuration
//!
//! The agent reads a single TOML file describing logging, sampling defaults,
//! delivery limits, and the channels and subscriptions to create at startup.
//! Every section is optional.
//!
//! # Config Location
//!
//! Without `--config` the agent looks in the platform config directory:
//! - **Linux**: `~/.config/perfscope/agent.toml`
//! - **macOS**: `~/Library/Application Support/perfscope/agent.toml`
//!
//! # Example
//!
//! ```toml
//! [logging]
//! filter = "info,perfscope=debug"
//! directory = "/var/log/perfscope"
//!
//! [sampling]
//! default_interval_ms = 1000
//!
//! [[channels]]
//! target = "/usr/bin/sleep"
//! args = ["60"]
//! sources = [{ kind = "memory" }, { kind = "cpu", interval_ms = 250 }]
//!
//! [[subscriptions]]
//! channel = 0
//! buffer_size = 4096
//! buffer_timeout_ms = 2000
//! sink = { kind = "file", path = "/tmp/perfscope.bin" }
//! ```

use crate::channel::ChannelSpec;
use crate::encoder::DEFAULT_ENCODER;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory name under the platform config dir
pub const APP_DIR: &str = "perfscope";

pub const CONFIG_FILE: &str = "agent.toml";

pub const DEFAULT_LOG_FILTER: &str = "info,perfscope=debug";

pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1000;

pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 500;

pub const DEFAULT_RETRY_QUEUE_LEN: usize = crate::subscription::DEFAULT_RETRY_QUEUE_LEN;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine the config directory")]
    NoConfigDir,

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Default config file path for this platform.
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_DIR).join(CONFIG_FILE))
}

// ==================== Sections ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub filter: String,
    /// When set, logs also go to a daily-rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
            stdout: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub default_interval_ms: u64,
    pub proc_root: PathBuf,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl SamplingConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub timeout_ms: u64,
    pub retry_queue_len: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            retry_queue_len: DEFAULT_RETRY_QUEUE_LEN,
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Program to spawn. Mutually exclusive with `pid`.
    pub target: Option<String>,
    pub args: Vec<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub working_dir: Option<PathBuf>,
    /// Existing process to observe.
    pub pid: Option<u32>,
    pub kill_on_stop: bool,
    pub sources: Vec<SourceConfig>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            target: None,
            args: Vec::new(),
            env: None,
            working_dir: None,
            pid: None,
            kill_on_stop: true,
            sources: Vec::new(),
        }
    }
}

impl ChannelConfig {
    pub fn to_spec(&self) -> Result<ChannelSpec, ConfigError> {
        let spec = match (&self.target, self.pid) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "a channel cannot set both `target` and `pid`".to_string(),
                ))
            }
            (Some(program), None) => {
                let mut spec = ChannelSpec::spawn(program.clone()).args(self.args.iter().cloned());
                if let Some(env) = &self.env {
                    spec = spec.env(env.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
                }
                if let Some(dir) = &self.working_dir {
                    spec = spec.working_dir(dir.clone());
                }
                spec
            }
            (None, Some(pid)) => ChannelSpec::attach(pid),
            (None, None) => ChannelSpec::host(),
        };
        Ok(spec.kill_on_stop(self.kill_on_stop))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Index into `channels`.
    pub channel: usize,
    #[serde(default)]
    pub buffer_size: usize,
    #[serde(default)]
    pub buffer_timeout_ms: u64,
    #[serde(default = "default_encoder")]
    pub encoder: String,
    pub sink: SinkConfig,
    /// Source kinds to deliver. All sources when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

fn default_encoder() -> String {
    DEFAULT_ENCODER.to_string()
}

// ==================== Agent Config ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub logging: LoggingConfig,
    pub sampling: SamplingConfig,
    pub delivery: DeliveryConfig,
    pub channels: Vec<ChannelConfig>,
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl AgentConfig {
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Load a config file, returning defaults if it is missing or broken.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check cross-references that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, channel) in self.channels.iter().enumerate() {
            channel
                .to_spec()
                .map_err(|e| ConfigError::Invalid(format!("channels[{i}]: {e}")))?;
        }
        for (i, subscription) in self.subscriptions.iter().enumerate() {
            if subscription.channel >= self.channels.len() {
                return Err(ConfigError::Invalid(format!(
                    "subscriptions[{i}] refers to channel {} but only {} are defined",
                    subscription.channel,
                    self.channels.len()
                )));
            }
        }
        Ok(())
    }
}
