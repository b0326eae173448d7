//! Container engine interface.
//!
//! The engine client itself lives outside this crate. Anything that can
//! create, start, attach to, wait for and remove containers can drive
//! commands by implementing [`ContainerEngine`].
//!
//! Option types mirror the engine's container-create request and serialize
//! with its PascalCase field names, so an adapter can forward them as-is.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Opaque error returned by an engine call.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// Bidirectional byte stream to a running container's standard streams.
///
/// The write side feeds the container's stdin; the read side carries its
/// (usually multiplexed) stdout and stderr.
pub trait AttachStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AttachStream for T {}

/// Remote operations consumed from the container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a container and return its identifier.
    async fn create_container(
        &self,
        options: &CreateContainerOptions,
    ) -> Result<String, EngineError>;

    /// Start a created container.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Attach to a running container's standard streams.
    async fn attach_container(
        &self,
        id: &str,
        options: AttachOptions,
    ) -> Result<Box<dyn AttachStream>, EngineError>;

    /// Block until the container exits and return its status code.
    async fn wait_container(&self, id: &str) -> Result<i64, EngineError>;

    /// Remove a container.
    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), EngineError>;
}

/// Options for creating a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerOptions {
    /// Container name; the engine picks one when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Container configuration. Required.
    #[serde(default)]
    pub config: Option<ContainerConfig>,
    /// Host-side configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_config: Option<HostConfig>,
    /// Network endpoint configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking_config: Option<NetworkingConfig>,
}

impl CreateContainerOptions {
    /// Options for a container running `image` with everything else defaulted.
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            config: Some(ContainerConfig::new(image)),
            ..Default::default()
        }
    }

    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Engine-level container configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerConfig {
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
    /// Environment as `KEY=VALUE` entries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Allocate a terminal. The attach stream is then raw, not multiplexed.
    pub tty: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub open_stdin: bool,
    pub stdin_once: bool,
}

impl ContainerConfig {
    /// Config for `image` with everything else defaulted.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

/// Host-side container configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    /// Volume bindings in `host:container[:mode]` form.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    pub auto_remove: bool,
}

/// Network endpoint configuration keyed by network name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkingConfig {
    pub endpoints_config: HashMap<String, EndpointSettings>,
}

/// Settings for one network endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EndpointSettings {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// Which streams to attach and whether to replay earlier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Keep the connection open and stream live output.
    pub stream: bool,
    /// Replay output produced before the attach.
    pub logs: bool,
}

impl AttachOptions {
    /// Attach all three streams, live, with replay of earlier output.
    pub fn all() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            stream: true,
            logs: true,
        }
    }
}

/// Options for removing a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveOptions {
    /// Kill the container first if it is still running.
    pub force: bool,
}
