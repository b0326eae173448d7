//! Command execution through a container engine.
//!
//! This module provides:
//! - [`Command`], a local-process style API (`start`, `wait`, `run`,
//!   `output`, `combined_output`)
//! - [`Execution`], the strategy deciding where the command runs
//! - [`ByCreatingContainer`], which runs each command in a fresh container
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(engine: impl container_exec::ContainerEngine + 'static) -> container_exec::Result<()> {
//! use container_exec::{ByCreatingContainer, CommandExecutor, CreateContainerOptions};
//!
//! let executor = CommandExecutor::from_engine(engine);
//! let method = ByCreatingContainer::new(CreateContainerOptions::with_image("busybox"))?;
//!
//! let out = executor
//!     .command(method, "echo", ["I am running inside a container!"])
//!     .output()
//!     .await?;
//! println!("{}", String::from_utf8_lossy(&out));
//! # Ok(())
//! # }
//! ```

mod command;
mod create;
mod executor;
mod state;
mod strategy;

pub use command::Command;
pub use create::{by_creating_container, ByCreatingContainer};
pub use executor::CommandExecutor;
pub use state::Phase;
pub use strategy::{never_cancel, CancelSignal, Execution};
