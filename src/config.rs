//! Configuration file support
//!
//! Every setting has a default, so the file is optional and may be partial.
//! Command line flags take precedence over values read here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use dockscope_docker::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_LINE_LENGTH, StreamSettings};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub docker: DockerConfig,
    pub classify: ClassifyConfig,
}

/// Daemon connection and event stream tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DockerConfig {
    /// Daemon address (`unix://...` or `tcp://...`), `DOCKER_HOST` if unset
    pub host: Option<String>,

    /// Lines buffered between the rewrite task and the output
    pub channel_capacity: usize,

    /// Give up on a silent event stream after this many seconds
    pub idle_timeout_secs: Option<u64>,

    /// Longest accepted event line in bytes
    pub max_line_length: usize,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            idle_timeout_secs: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl DockerConfig {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            channel_capacity: self.channel_capacity,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
            max_line_length: self.max_line_length,
        }
    }
}

/// Default filter for the `classify` command
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifyConfig {
    /// Level names to keep (empty = all)
    pub levels: Vec<String>,

    /// Regex the raw line must match
    pub pattern: Option<String>,

    pub case_insensitive: bool,
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load the configuration file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
