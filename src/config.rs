//! Configuration management for container-exec.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file (JSON)
//! 3. Default values

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{ContainerConfig, CreateContainerOptions, HostConfig};
use crate::execution::ByCreatingContainer;
use crate::io::DEFAULT_BUFFER_SIZE;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base container settings for every command.
    pub container: ContainerSection,
    /// Stream copying settings.
    pub io: IoSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Base container settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSection {
    /// Image commands run in.
    pub image: String,
    /// Container name. Leave empty to let the engine choose.
    pub name: String,
    /// User to run as.
    pub user: String,
    /// Default working directory. Commands cannot override it when set.
    pub working_dir: String,
    /// Default environment. Commands cannot override it when set.
    pub env: HashMap<String, String>,
    /// Allocate a terminal. Output then arrives as a single raw stream.
    pub tty: bool,
    /// Network mode, e.g. `none` or `bridge`.
    pub network_mode: Option<String>,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            image: "busybox".to_string(),
            name: String::new(),
            user: String::new(),
            working_dir: String::new(),
            env: HashMap::new(),
            tty: false,
            network_mode: None,
        }
    }
}

/// Stream copying settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoSection {
    /// Chunk size, in bytes, for copying container output.
    pub buffer_size: usize,
}

impl Default for IoSection {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level or filter directive (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load configuration with the full priority chain.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(image) = std::env::var("CONTAINER_EXEC_IMAGE") {
            if !image.is_empty() {
                self.container.image = image;
            }
        }

        if let Ok(network) = std::env::var("CONTAINER_EXEC_NETWORK") {
            if !network.is_empty() {
                self.container.network_mode = Some(network);
            }
        }

        if let Ok(size) = std::env::var("CONTAINER_EXEC_BUFFER_SIZE") {
            if let Ok(size) = size.parse() {
                self.io.buffer_size = size;
            }
        }

        if let Ok(level) = std::env::var("CONTAINER_EXEC_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Check values that would only fail later at the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container.image.trim().is_empty() {
            return Err(ConfigError::Invalid("container.image must not be empty"));
        }
        if self.io.buffer_size == 0 {
            return Err(ConfigError::Invalid("io.buffer_size must be positive"));
        }
        Ok(())
    }

    /// Render the container section as engine create options.
    pub fn create_options(&self) -> CreateContainerOptions {
        let section = &self.container;

        let mut env: Vec<String> = section
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        env.sort();

        let config = ContainerConfig {
            user: section.user.clone(),
            working_dir: section.working_dir.clone(),
            env,
            tty: section.tty,
            ..ContainerConfig::new(section.image.clone())
        };

        let host_config = section.network_mode.as_ref().map(|mode| HostConfig {
            network_mode: Some(mode.clone()),
            ..HostConfig::default()
        });

        CreateContainerOptions {
            name: section.name.clone(),
            config: Some(config),
            host_config,
            networking_config: None,
        }
    }

    /// Build a fresh strategy for one command.
    pub fn strategy(&self) -> crate::Result<ByCreatingContainer> {
        ByCreatingContainer::new(self.create_options())
            .map(|strategy| strategy.with_buffer_size(self.io.buffer_size))
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error.
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
