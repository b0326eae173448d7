//! Execution by creating a fresh container per command.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::state::Phase;
use super::strategy::{CancelSignal, Execution};
use crate::engine::{
    AttachOptions, AttachStream, ContainerConfig, ContainerEngine, CreateContainerOptions,
    RemoveOptions,
};
use crate::error::ExecError;
use crate::io::{demux, BoxedReader, BoxedWriter, StreamMode, DEFAULT_BUFFER_SIZE};
use crate::Result;

/// Execution strategy that creates a new container for the command.
///
/// The container is created and started by `Command::start` and is removed
/// before `Command::wait` returns. The command line replaces the image
/// entrypoint, so the program runs exactly as given.
///
/// Each instance owns its options and serves a single command.
pub struct ByCreatingContainer {
    options: CreateContainerOptions,
    argv: Vec<String>,
    buffer_size: usize,
    state: State,
}

enum State {
    Unconfigured,
    Created { id: String },
    Attached(Box<Attached>),
    Exited,
}

struct Attached {
    id: String,
    stream: Box<dyn AttachStream>,
    stdin: BoxedReader,
    stdout: BoxedWriter,
    stderr: BoxedWriter,
}

/// Build a [`ByCreatingContainer`] strategy from `options`.
///
/// Fails with [`ExecError::ConfigMissing`] if `options.config` is `None`.
pub fn by_creating_container(options: CreateContainerOptions) -> Result<ByCreatingContainer> {
    ByCreatingContainer::new(options)
}

impl ByCreatingContainer {
    /// Create the strategy, taking ownership of `options`.
    pub fn new(options: CreateContainerOptions) -> Result<Self> {
        if options.config.is_none() {
            return Err(ExecError::ConfigMissing);
        }
        Ok(Self {
            options,
            argv: Vec::new(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            state: State::Unconfigured,
        })
    }

    /// Set the chunk size used when copying output.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// The container options, including any overrides applied so far.
    pub fn options(&self) -> &CreateContainerOptions {
        &self.options
    }

    /// The command line injected as entrypoint, once created.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Identifier of the container, while it exists.
    pub fn container_id(&self) -> Option<&str> {
        match &self.state {
            State::Created { id } => Some(id),
            State::Attached(attached) => Some(&attached.id),
            State::Unconfigured | State::Exited => None,
        }
    }

    fn pending_config(&mut self) -> Result<&mut ContainerConfig> {
        if !matches!(self.state, State::Unconfigured) {
            return Err(ExecError::AlreadyStarted);
        }
        self.options.config.as_mut().ok_or(ExecError::ConfigMissing)
    }

    fn stream_mode(&self) -> StreamMode {
        StreamMode::for_tty(self.options.config.as_ref().is_some_and(|c| c.tty))
    }

    /// Remove a container that failed to come up and fold any removal
    /// failure into `err`.
    async fn remove_after_failure(
        &mut self,
        engine: &dyn ContainerEngine,
        id: &str,
        err: ExecError,
    ) -> ExecError {
        self.state = State::Exited;
        match engine.remove_container(id, RemoveOptions { force: true }).await {
            Ok(()) => {
                debug!(container = %id, "removed container after failed start");
                err
            }
            Err(cleanup) => {
                warn!(
                    container = %id,
                    error = %cleanup,
                    "failed to remove container after failed start"
                );
                err.with_cleanup_failure(id, cleanup)
            }
        }
    }
}

#[async_trait]
impl Execution for ByCreatingContainer {
    fn phase(&self) -> Phase {
        match self.state {
            State::Unconfigured => Phase::Unconfigured,
            State::Created { .. } => Phase::Created,
            State::Attached(_) => Phase::Attached,
            State::Exited => Phase::Exited,
        }
    }

    fn set_env(&mut self, env: Vec<String>) -> Result<()> {
        let config = self.pending_config()?;
        if !config.env.is_empty() {
            return Err(ExecError::EnvAlreadySet);
        }
        config.env = env;
        Ok(())
    }

    fn set_dir(&mut self, dir: String) -> Result<()> {
        let config = self.pending_config()?;
        if !config.working_dir.is_empty() {
            return Err(ExecError::DirAlreadySet);
        }
        config.working_dir = dir;
        Ok(())
    }

    async fn create(&mut self, engine: &dyn ContainerEngine, argv: Vec<String>) -> Result<()> {
        let config = self.pending_config()?;
        if !config.cmd.is_empty() {
            return Err(ExecError::CmdAlreadySet);
        }
        if !config.entrypoint.is_empty() {
            return Err(ExecError::EntrypointAlreadySet);
        }

        // Only committed once the engine accepts it.
        let mut options = self.options.clone();
        if let Some(config) = options.config.as_mut() {
            config.attach_stdin = true;
            config.attach_stdout = true;
            config.attach_stderr = true;
            config.open_stdin = true;
            config.stdin_once = true;
            config.cmd.clear();
            config.entrypoint = argv.clone();
        }

        debug!(name = %options.name, argv = ?argv, "creating container");
        let id = engine
            .create_container(&options)
            .await
            .map_err(|source| ExecError::CreateFailed { source })?;
        debug!(container = %id, "container created");

        self.options = options;
        self.argv = argv;
        self.state = State::Created { id };
        Ok(())
    }

    async fn run(
        &mut self,
        engine: &dyn ContainerEngine,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
    ) -> Result<()> {
        let id = match &self.state {
            State::Created { id } => id.clone(),
            State::Unconfigured => return Err(ExecError::NotCreated),
            State::Attached(_) | State::Exited => return Err(ExecError::AlreadyStarted),
        };

        if let Err(source) = engine.start_container(&id).await {
            let err = ExecError::StartFailed {
                id: id.clone(),
                source,
            };
            return Err(self.remove_after_failure(engine, &id, err).await);
        }
        debug!(container = %id, "container started");

        let stream = match engine.attach_container(&id, AttachOptions::all()).await {
            Ok(stream) => stream,
            Err(source) => {
                let err = ExecError::AttachFailed {
                    id: id.clone(),
                    source,
                };
                return Err(self.remove_after_failure(engine, &id, err).await);
            }
        };
        debug!(container = %id, "container attached");

        self.state = State::Attached(Box::new(Attached {
            id,
            stream,
            stdin,
            stdout,
            stderr,
        }));
        Ok(())
    }

    async fn wait(&mut self, engine: &dyn ContainerEngine, mut cancel: CancelSignal) -> Result<i64> {
        let attached = match std::mem::replace(&mut self.state, State::Exited) {
            State::Attached(attached) => *attached,
            previous => {
                self.state = previous;
                return Err(ExecError::NotAttached);
            }
        };
        let Attached {
            id,
            stream,
            stdin,
            mut stdout,
            mut stderr,
        } = attached;
        let mode = self.stream_mode();
        let buffer_size = self.buffer_size;

        let (mut reader, writer) = tokio::io::split(stream);
        let pump = tokio::spawn(pump_stdin(id.clone(), stdin, writer));

        let streamed = tokio::select! {
            res = demux(&mut reader, &mut *stdout, &mut *stderr, mode, buffer_size) => Some(res),
            _ = &mut cancel => None,
        };
        join_pump(&id, pump).await;
        drop(reader);

        let outcome = match streamed {
            None => Err(ExecError::Cancelled),
            Some(Err(source)) => Err(ExecError::AttachStream {
                id: id.clone(),
                source,
            }),
            Some(Ok(stats)) => {
                debug!(
                    container = %id,
                    frames = stats.frames,
                    stdout_bytes = stats.stdout_bytes,
                    stderr_bytes = stats.stderr_bytes,
                    "output stream closed"
                );
                tokio::select! {
                    res = engine.wait_container(&id) => res.map_err(|source| ExecError::WaitFailed {
                        id: id.clone(),
                        source,
                    }),
                    _ = &mut cancel => Err(ExecError::Cancelled),
                }
            }
        };

        let removed = engine
            .remove_container(&id, RemoveOptions { force: true })
            .await;
        match (outcome, removed) {
            (Ok(code), Ok(())) => {
                debug!(container = %id, code, "container exited and removed");
                Ok(code)
            }
            (Ok(_), Err(source)) => Err(ExecError::DeleteFailed { id, source }),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => {
                warn!(container = %id, error = %cleanup, "failed to remove container");
                Err(err.with_cleanup_failure(&id, cleanup))
            }
        }
    }
}

/// Copy the caller's stdin into the container, then half-close.
///
/// Failures are logged only: the exit code stays authoritative.
async fn pump_stdin(id: String, mut stdin: BoxedReader, mut conn: WriteHalf<Box<dyn AttachStream>>) {
    match tokio::io::copy(&mut stdin, &mut conn).await {
        Ok(bytes) => trace!(container = %id, bytes, "stdin exhausted"),
        Err(e) => warn!(container = %id, error = %e, "failed to copy stdin to container"),
    }
    if let Err(e) = conn.shutdown().await {
        debug!(container = %id, error = %e, "failed to close container stdin");
    }
}

/// How long a pump that is still flushing or half-closing gets to finish
/// before it is stopped.
const PUMP_GRACE: Duration = Duration::from_millis(50);

/// Join the stdin pump, stopping it if its source is still open after
/// [`PUMP_GRACE`].
async fn join_pump(id: &str, mut pump: JoinHandle<()>) {
    let joined = match tokio::time::timeout(PUMP_GRACE, &mut pump).await {
        Ok(joined) => joined,
        Err(_) => {
            debug!(container = %id, "output ended before stdin; stopping stdin pump");
            pump.abort();
            pump.await
        }
    };
    if let Err(e) = joined {
        if !e.is_cancelled() {
            warn!(container = %id, error = %e, "stdin pump panicked");
        }
    }
}

impl fmt::Debug for ByCreatingContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByCreatingContainer")
            .field("options", &self.options)
            .field("argv", &self.argv)
            .field("phase", &self.phase())
            .field("container_id", &self.container_id())
            .finish()
    }
}

impl Drop for ByCreatingContainer {
    fn drop(&mut self) {
        if let Some(id) = self.container_id() {
            warn!(container = %id, "execution dropped before wait; container left on engine");
        }
    }
}
