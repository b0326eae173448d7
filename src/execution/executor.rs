//! Engine handle for building commands.

use std::fmt;
use std::sync::Arc;

use super::command::Command;
use super::create::ByCreatingContainer;
use super::strategy::Execution;
use crate::engine::{ContainerEngine, CreateContainerOptions};
use crate::Result;

/// Builds commands that run against one container engine.
#[derive(Clone)]
pub struct CommandExecutor {
    engine: Arc<dyn ContainerEngine>,
}

impl CommandExecutor {
    /// Create an executor over a shared engine client.
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Create an executor that owns `engine`.
    pub fn from_engine(engine: impl ContainerEngine + 'static) -> Self {
        Self::new(Arc::new(engine))
    }

    /// The engine client.
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Build a command running `path` with `args` through `method`.
    ///
    /// Use a new `method` for every command.
    pub fn command<I, S>(
        &self,
        method: impl Execution + 'static,
        path: impl Into<String>,
        args: I,
    ) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::new(Arc::clone(&self.engine), method, path).args(args)
    }

    /// Run `path` in a new container built from `options` and return its
    /// stdout.
    pub async fn output_of<I, S>(
        &self,
        options: CreateContainerOptions,
        path: impl Into<String>,
        args: I,
    ) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let method = ByCreatingContainer::new(options)?;
        self.command(method, path, args).output().await
    }
}

impl fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecutor").finish_non_exhaustive()
    }
}
