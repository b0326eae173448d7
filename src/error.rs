//! Error types for container-exec.

use std::fmt;

use thiserror::Error;

use crate::engine::EngineError;
use crate::io::DemuxError;

/// Main error type for command execution.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The execution strategy was built without a container configuration.
    #[error("container config is not set")]
    ConfigMissing,

    /// The execution strategy has no option container to configure.
    #[error("execution strategy does not accept {0} overrides")]
    NotConfigurable(&'static str),

    /// `start` was called twice on the same command.
    #[error("already started")]
    AlreadyStarted,

    /// `wait` was called before `start`.
    #[error("not started")]
    NotStarted,

    /// `run` was called on a strategy that has not created its container.
    #[error("container is not created")]
    NotCreated,

    /// `wait` was called on a strategy that is not attached to its container.
    #[error("container is not attached")]
    NotAttached,

    /// Container config already carries environment variables.
    #[error("Config.Env already set")]
    EnvAlreadySet,

    /// Container config already carries a working directory.
    #[error("Config.WorkingDir already set")]
    DirAlreadySet,

    /// Container config already carries a command.
    #[error("Config.Cmd already set")]
    CmdAlreadySet,

    /// Container config already carries an entrypoint.
    #[error("Config.Entrypoint already set")]
    EntrypointAlreadySet,

    /// Stdin was assigned before the operation that wants to own it.
    #[error("Stdin already set")]
    StdinAlreadySet,

    /// Stdout was assigned before the operation that wants to own it.
    #[error("Stdout already set")]
    StdoutAlreadySet,

    /// Stderr was assigned before the operation that wants to own it.
    #[error("Stderr already set")]
    StderrAlreadySet,

    /// The engine refused to create the container.
    #[error("failed to create container: {source}")]
    CreateFailed {
        #[source]
        source: EngineError,
    },

    /// The engine refused to start the container.
    #[error("failed to start container {id}: {source}")]
    StartFailed {
        id: String,
        #[source]
        source: EngineError,
    },

    /// The engine refused to attach to the container.
    #[error("failed to attach container {id}: {source}")]
    AttachFailed {
        id: String,
        #[source]
        source: EngineError,
    },

    /// The attached output stream could not be demultiplexed.
    #[error("attach error on container {id}: {source}")]
    AttachStream {
        id: String,
        #[source]
        source: DemuxError,
    },

    /// Waiting for the container to exit failed.
    #[error("cannot wait for container {id}: {source}")]
    WaitFailed {
        id: String,
        #[source]
        source: EngineError,
    },

    /// Removing the container failed after an otherwise successful run.
    #[error("error deleting container {id}: {source}")]
    DeleteFailed {
        id: String,
        #[source]
        source: EngineError,
    },

    /// A primary failure followed by a failed container removal.
    #[error("{primary} (additionally, removing container {id} failed: {cleanup})")]
    CleanupFailed {
        id: String,
        #[source]
        primary: Box<ExecError>,
        cleanup: EngineError,
    },

    /// A failure of `output` or `combined_output` that happened after the
    /// program started, with whatever output was captured before it.
    #[error("{source} ({} bytes of output captured)", .output.len())]
    Captured {
        output: Vec<u8>,
        #[source]
        source: Box<ExecError>,
    },

    /// The wait was cancelled by the caller.
    #[error("wait cancelled")]
    Cancelled,

    /// The program ran to completion with a non-zero exit code.
    #[error(transparent)]
    Exit(#[from] ExitError),
}

/// Coarse classification of an [`ExecError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An operation was invoked out of the required order.
    Sequence,
    /// Caller intent collides with a slot this crate owns.
    ConfigConflict,
    /// A remote engine call or the attach stream failed.
    Transport,
    /// The program exited with a non-zero code.
    Exit,
    /// The caller cancelled the wait.
    Cancelled,
}

impl ExecError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        use ExecError::*;
        match self {
            AlreadyStarted | NotStarted | NotCreated | NotAttached => ErrorKind::Sequence,
            ConfigMissing | NotConfigurable(_) | EnvAlreadySet | DirAlreadySet | CmdAlreadySet
            | EntrypointAlreadySet | StdinAlreadySet | StdoutAlreadySet | StderrAlreadySet => {
                ErrorKind::ConfigConflict
            }
            CreateFailed { .. }
            | StartFailed { .. }
            | AttachFailed { .. }
            | AttachStream { .. }
            | WaitFailed { .. }
            | DeleteFailed { .. } => ErrorKind::Transport,
            CleanupFailed { primary, .. } => primary.kind(),
            Captured { source, .. } => source.kind(),
            Cancelled => ErrorKind::Cancelled,
            Exit(_) => ErrorKind::Exit,
        }
    }

    /// Exit code of the program, if this is a non-zero exit outcome.
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            ExecError::Exit(e) => Some(e.code),
            ExecError::CleanupFailed { primary, .. } => primary.exit_code(),
            ExecError::Captured { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    /// Output captured by `output` or `combined_output` before the failure.
    pub fn captured_output(&self) -> Option<&[u8]> {
        match self {
            ExecError::Captured { output, .. } => Some(output.as_slice()),
            ExecError::Exit(e) => e.stdout.as_deref(),
            _ => None,
        }
    }

    /// The error beneath any captured output.
    pub fn root(&self) -> &ExecError {
        match self {
            ExecError::Captured { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the exit outcome, if any.
    pub fn as_exit(&self) -> Option<&ExitError> {
        match self {
            ExecError::Exit(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn with_output(self, output: Vec<u8>) -> Self {
        match self {
            ExecError::Exit(mut exit) => {
                exit.stdout = Some(output);
                ExecError::Exit(exit)
            }
            other => ExecError::Captured {
                output,
                source: Box::new(other),
            },
        }
    }

    /// Attach a failed container removal to this error.
    pub(crate) fn with_cleanup_failure(self, id: &str, cleanup: EngineError) -> Self {
        ExecError::CleanupFailed {
            id: id.to_string(),
            primary: Box::new(self),
            cleanup,
        }
    }
}

/// A program that ran to completion and returned a non-zero status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitError {
    /// Exit code reported by the engine.
    pub code: i64,
    /// Stdout captured by `output` or `combined_output`.
    pub stdout: Option<Vec<u8>>,
    /// Stderr captured by `output` when the caller did not claim stderr.
    pub stderr: Option<Vec<u8>>,
}

impl ExitError {
    /// Create an exit outcome without captured output.
    pub fn new(code: i64) -> Self {
        Self {
            code,
            stdout: None,
            stderr: None,
        }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit status: {}", self.code)
    }
}

impl std::error::Error for ExitError {}

/// Convenience Result type for container-exec operations.
pub type Result<T> = std::result::Result<T, ExecError>;
