//! # container-exec
//!
//! Run commands inside containers with the shape of a local process API.
//!
//! A [`Command`] is built with a path, arguments, optional environment,
//! working directory and stdio, plus an [`Execution`] strategy deciding
//! where it runs. [`ByCreatingContainer`] creates a fresh container for the
//! command, injects the command line as its entrypoint, streams stdin in and
//! stdout/stderr out over one attached connection, and removes the container
//! once the exit code is known.
//!
//! The container engine client is supplied by the caller through the
//! [`ContainerEngine`] trait.
//!
//! ## Quick Start
//!
//! ```no_run
//! use container_exec::{ByCreatingContainer, CommandExecutor, ContainerEngine, CreateContainerOptions, ExecError};
//!
//! async fn check(engine: impl ContainerEngine + 'static) -> container_exec::Result<()> {
//!     container_exec::logging::try_init().ok();
//!
//!     let executor = CommandExecutor::from_engine(engine);
//!     let method = ByCreatingContainer::new(CreateContainerOptions::with_image("busybox"))?;
//!
//!     match executor.command(method, "sh", ["-c", "exit 3"]).run().await {
//!         Err(ExecError::Exit(e)) => println!("program failed with {}", e.code),
//!         Err(e) => return Err(e),
//!         Ok(()) => println!("ok"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod io;
pub mod logging;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use engine::{
    AttachOptions, AttachStream, ContainerConfig, ContainerEngine, CreateContainerOptions,
    EngineError, HostConfig, NetworkingConfig, RemoveOptions,
};
pub use error::{ErrorKind, ExecError, ExitError, Result};
pub use execution::{
    by_creating_container, ByCreatingContainer, Command, CommandExecutor, Execution, Phase,
};
pub use io::{CaptureBuffer, DemuxError, StreamMode};
