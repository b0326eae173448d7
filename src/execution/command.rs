//! The caller-facing command.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tracing::debug;

use super::strategy::{never_cancel, CancelSignal, Execution};
use crate::engine::ContainerEngine;
use crate::error::{ExecError, ExitError};
use crate::io::{discard, null_reader, BoxedReader, BoxedWriter, CaptureBuffer};
use crate::Result;

/// Buffer capacity of the in-memory pipes returned by the `*_pipe` methods.
const PIPE_CAPACITY: usize = 64 * 1024;

/// A program to run through an execution strategy.
///
/// Mirrors a local process API: configure, then `start` + `wait`, `run`,
/// `output` or `combined_output`. A command runs at most once.
pub struct Command {
    /// Path or name of the program inside the container.
    pub path: String,
    /// Arguments, excluding the program itself.
    pub args: Vec<String>,
    /// Environment for the program. `None` keeps what the strategy or image
    /// provides.
    pub env: Option<BTreeMap<String, String>>,
    /// Working directory. `None` keeps what the strategy or image provides.
    pub dir: Option<String>,
    /// Standard input. Reads as empty when unset.
    pub stdin: Option<BoxedReader>,
    /// Standard output. Discarded when unset.
    pub stdout: Option<BoxedWriter>,
    /// Standard error. Discarded when unset.
    pub stderr: Option<BoxedWriter>,

    method: Box<dyn Execution>,
    engine: Arc<dyn ContainerEngine>,
    started: bool,
}

impl Command {
    /// Create a command that runs `path` through `method` on `engine`.
    ///
    /// `method` must not be shared with another command.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        method: impl Execution + 'static,
        path: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: None,
            dir: None,
            stdin: None,
            stdout: None,
            stderr: None,
            method: Box::new(method),
            engine,
            started: false,
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let env = self.env.get_or_insert_with(BTreeMap::new);
        for (k, v) in vars {
            env.insert(k.into(), v.into());
        }
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set standard input.
    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Set standard output.
    pub fn stdout(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(writer));
        self
    }

    /// Set standard error.
    pub fn stderr(mut self, writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(writer));
        self
    }

    /// The execution strategy driving this command.
    pub fn method(&self) -> &dyn Execution {
        &*self.method
    }

    /// Whether `start` has been called, successfully or not.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Return a pipe whose read end becomes the program's stdin.
    ///
    /// Dropping or shutting down the returned stream ends the input.
    pub fn stdin_pipe(&mut self) -> Result<DuplexStream> {
        if self.started {
            return Err(ExecError::AlreadyStarted);
        }
        if self.stdin.is_some() {
            return Err(ExecError::StdinAlreadySet);
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        self.stdin = Some(Box::new(theirs));
        Ok(ours)
    }

    /// Return a pipe that receives the program's stdout.
    ///
    /// The pipe must be drained while `wait` runs, or output stalls once
    /// its buffer is full.
    pub fn stdout_pipe(&mut self) -> Result<DuplexStream> {
        if self.started {
            return Err(ExecError::AlreadyStarted);
        }
        if self.stdout.is_some() {
            return Err(ExecError::StdoutAlreadySet);
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        self.stdout = Some(Box::new(theirs));
        Ok(ours)
    }

    /// Return a pipe that receives the program's stderr.
    ///
    /// Same draining rules as [`Command::stdout_pipe`].
    pub fn stderr_pipe(&mut self) -> Result<DuplexStream> {
        if self.started {
            return Err(ExecError::AlreadyStarted);
        }
        if self.stderr.is_some() {
            return Err(ExecError::StderrAlreadySet);
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        self.stderr = Some(Box::new(theirs));
        Ok(ours)
    }

    /// Start the command without waiting for it to finish.
    ///
    /// A command can only be started once, even if starting fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ExecError::AlreadyStarted);
        }
        if let Some(dir) = self.dir.as_ref().filter(|d| !d.is_empty()) {
            self.method.set_dir(dir.clone())?;
        }
        if let Some(env) = &self.env {
            let entries = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
            self.method.set_env(entries)?;
        }
        self.started = true;

        let stdin = self.stdin.take().unwrap_or_else(null_reader);
        let stdout = self.stdout.take().unwrap_or_else(discard);
        let stderr = self.stderr.take().unwrap_or_else(discard);

        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.path.clone());
        argv.extend(self.args.iter().cloned());

        debug!(path = %self.path, args = ?self.args, "starting command");
        self.method.create(&*self.engine, argv).await?;
        self.method
            .run(&*self.engine, stdin, stdout, stderr)
            .await
    }

    /// Wait for the command to exit. It must have been started by `start`.
    ///
    /// A non-zero exit code is returned as [`ExecError::Exit`]; every other
    /// error means the plumbing failed.
    pub async fn wait(&mut self) -> Result<()> {
        self.wait_inner(never_cancel()).await
    }

    /// Like [`Command::wait`], but gives up once `signal` resolves.
    ///
    /// The container is still removed and the call returns
    /// [`ExecError::Cancelled`].
    pub async fn wait_with_cancel<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.wait_inner(Box::pin(signal)).await
    }

    async fn wait_inner(&mut self, cancel: CancelSignal) -> Result<()> {
        if !self.started {
            return Err(ExecError::NotStarted);
        }
        let code = self.method.wait(&*self.engine, cancel).await?;
        debug!(path = %self.path, code, "command exited");
        if code != 0 {
            return Err(ExitError::new(code).into());
        }
        Ok(())
    }

    /// Start the command and wait for it to finish.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.wait().await
    }

    /// Run the command and return stdout and stderr interleaved.
    ///
    /// Once the program has started, a failure still carries the bytes
    /// captured so far: on [`ExitError::stdout`] for a non-zero exit, and
    /// in [`ExecError::Captured`] otherwise.
    pub async fn combined_output(&mut self) -> Result<Vec<u8>> {
        if self.stdout.is_some() {
            return Err(ExecError::StdoutAlreadySet);
        }
        if self.stderr.is_some() {
            return Err(ExecError::StderrAlreadySet);
        }
        let combined = CaptureBuffer::new();
        self.stdout = Some(Box::new(combined.clone()));
        self.stderr = Some(Box::new(combined.clone()));

        let was_started = self.started;
        match self.run().await {
            Ok(()) => Ok(combined.take()),
            Err(e) if was_started || !self.started => {
                self.stdout = None;
                self.stderr = None;
                Err(e)
            }
            Err(e) => Err(e.with_output(combined.take())),
        }
    }

    /// Run the command and return its stdout.
    ///
    /// Captured stdout survives failures as in
    /// [`Command::combined_output`]. If stderr was not set, it is captured
    /// and attached to the [`ExitError`] on a non-zero exit.
    pub async fn output(&mut self) -> Result<Vec<u8>> {
        if self.stdout.is_some() {
            return Err(ExecError::StdoutAlreadySet);
        }
        let stdout = CaptureBuffer::new();
        self.stdout = Some(Box::new(stdout.clone()));

        let stderr = if self.stderr.is_none() {
            let buf = CaptureBuffer::new();
            self.stderr = Some(Box::new(buf.clone()));
            Some(buf)
        } else {
            None
        };

        let was_started = self.started;
        match self.run().await {
            Ok(()) => Ok(stdout.take()),
            Err(e) if was_started || !self.started => {
                // This call never started the program; leave stdio as the
                // caller set it.
                self.stdout = None;
                if stderr.is_some() {
                    self.stderr = None;
                }
                Err(e)
            }
            Err(ExecError::Exit(mut exit)) => {
                exit.stdout = Some(stdout.take());
                exit.stderr = stderr.map(|buf| buf.take());
                Err(exit.into())
            }
            Err(e) => Err(e.with_output(stdout.take())),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("dir", &self.dir)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("phase", &self.method.phase())
            .field("started", &self.started)
            .finish()
    }
}
