//! The execution strategy interface.

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use super::state::Phase;
use crate::engine::ContainerEngine;
use crate::error::ExecError;
use crate::io::{BoxedReader, BoxedWriter};
use crate::Result;

/// Resolves when the caller wants an in-flight wait abandoned.
pub type CancelSignal = BoxFuture<'static, ()>;

/// A signal that never fires.
pub fn never_cancel() -> CancelSignal {
    Box::pin(futures_util::future::pending())
}

/// Determines how a [`Command`](super::Command) is executed.
///
/// Operations must be called in order: `create`, `run`, `wait`. Calling one
/// out of order fails with a sequencing error without contacting the
/// engine. An instance drives exactly one command.
#[async_trait]
pub trait Execution: Send {
    /// Current lifecycle phase.
    fn phase(&self) -> Phase;

    /// Set the environment (`KEY=VALUE` entries) for the command.
    fn set_env(&mut self, _env: Vec<String>) -> Result<()> {
        Err(ExecError::NotConfigurable("env"))
    }

    /// Set the working directory for the command.
    fn set_dir(&mut self, _dir: String) -> Result<()> {
        Err(ExecError::NotConfigurable("dir"))
    }

    /// Prepare the command line `argv` on the engine.
    async fn create(&mut self, engine: &dyn ContainerEngine, argv: Vec<String>) -> Result<()>;

    /// Start the command and attach its standard streams.
    async fn run(
        &mut self,
        engine: &dyn ContainerEngine,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> Result<()>;

    /// Pump the streams until the command exits and return its exit code.
    async fn wait(&mut self, engine: &dyn ContainerEngine, cancel: CancelSignal) -> Result<i64>;
}
