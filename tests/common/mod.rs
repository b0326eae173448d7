//! In-memory container engine for integration tests.
//!
//! Programs are small Rust closures keyed by `argv[0]`. Output is framed
//! exactly as a real engine frames it, and every remote call is recorded.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

use container_exec::engine::{
    AttachOptions, AttachStream, ContainerConfig, ContainerEngine, CreateContainerOptions,
    EngineError, RemoveOptions,
};
use container_exec::{ByCreatingContainer, Command, CommandExecutor};

/// A remote call as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Start(String),
    Attach(String),
    Wait(String),
    Remove { id: String, force: bool },
}

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Start,
    Attach,
    Wait,
    Remove,
}

/// What a program sees when it runs.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub stdin: Vec<u8>,
}

/// A piece of output written to the attach stream.
#[derive(Debug, Clone)]
pub enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Written without framing.
    Raw(Vec<u8>),
}

/// Result of running a program. `None` from a program means it never exits.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub chunks: Vec<Chunk>,
    pub code: i64,
}

impl Outcome {
    fn exit(code: i64) -> Self {
        Self {
            chunks: Vec::new(),
            code,
        }
    }

    fn out(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.chunks.push(Chunk::Stdout(bytes.into()));
        self
    }

    fn err(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.chunks.push(Chunk::Stderr(bytes.into()));
        self
    }
}

type Program = Arc<dyn Fn(&Invocation) -> Option<Outcome> + Send + Sync>;

struct Container {
    config: ContainerConfig,
    process: Option<JoinHandle<i64>>,
}

#[derive(Default)]
struct EngineState {
    next_id: u64,
    containers: HashMap<String, Container>,
    created: Vec<CreateContainerOptions>,
    calls: Vec<Call>,
}

/// Scripted engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FakeEngine {
    programs: Arc<HashMap<String, Program>>,
    failures: Arc<HashSet<Op>>,
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            programs: Arc::new(builtin_programs()),
            failures: Arc::new(HashSet::new()),
            state: Arc::new(Mutex::new(EngineState::default())),
        }
    }

    /// Make every call of `op` fail.
    pub fn failing(mut self, op: Op) -> Self {
        Arc::make_mut(&mut self.failures).insert(op);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn created(&self) -> Vec<CreateContainerOptions> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(_)))
    }

    pub fn waits(&self) -> usize {
        self.count(|c| matches!(c, Call::Wait(_)))
    }

    pub fn removes(&self) -> usize {
        self.count(|c| matches!(c, Call::Remove { .. }))
    }

    /// Removals issued for the container with `id`.
    pub fn removes_of(&self, id: &str) -> usize {
        self.count(|c| matches!(c, Call::Remove { id: got, force: true } if got == id))
    }

    /// Containers still known to the engine.
    pub fn live_containers(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn check(&self, op: Op) -> Result<(), EngineError> {
        if self.failures.contains(&op) {
            return Err(format!("injected {op:?} failure").into());
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn create_container(
        &self,
        options: &CreateContainerOptions,
    ) -> Result<String, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("c{:04}", state.next_id);
        state.calls.push(Call::Create(id.clone()));
        state.created.push(options.clone());
        drop(state);

        self.check(Op::Create)?;
        let config = options.config.clone().ok_or("config is required")?;
        self.state.lock().unwrap().containers.insert(
            id.clone(),
            Container {
                config,
                process: None,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::Start(id.to_string()));
        self.check(Op::Start)?;

        let state = self.state.lock().unwrap();
        let container = state.containers.get(id).ok_or("no such container")?;
        let program = container.config.entrypoint.first().cloned().unwrap_or_default();
        if !self.programs.contains_key(&program) {
            return Err(format!("exec: {program:?}: executable file not found in $PATH").into());
        }
        Ok(())
    }

    async fn attach_container(
        &self,
        id: &str,
        options: AttachOptions,
    ) -> Result<Box<dyn AttachStream>, EngineError> {
        self.record(Call::Attach(id.to_string()));
        self.check(Op::Attach)?;
        assert_eq!(options, AttachOptions::all());

        let mut state = self.state.lock().unwrap();
        let container = state.containers.get_mut(id).ok_or("no such container")?;
        let config = container.config.clone();
        let program = Arc::clone(&self.programs[&config.entrypoint[0]]);

        let (client, server) = tokio::io::duplex(64 * 1024);
        container.process = Some(tokio::spawn(run_program(program, config, server)));
        Ok(Box::new(client))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EngineError> {
        self.record(Call::Wait(id.to_string()));
        self.check(Op::Wait)?;

        let process = {
            let mut state = self.state.lock().unwrap();
            let container = state.containers.get_mut(id).ok_or("no such container")?;
            container.process.take().ok_or("container is not running")?
        };
        Ok(process.await?)
    }

    async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<(), EngineError> {
        self.record(Call::Remove {
            id: id.to_string(),
            force: options.force,
        });
        self.check(Op::Remove)?;

        let container = self
            .state
            .lock()
            .unwrap()
            .containers
            .remove(id)
            .ok_or("no such container")?;
        if let Some(process) = container.process {
            process.abort();
        }
        Ok(())
    }
}

/// Programs that exit without waiting for end of input.
const IGNORES_STDIN: &[&str] = &["greet"];

async fn run_program(
    program: Program,
    config: ContainerConfig,
    server: tokio::io::DuplexStream,
) -> i64 {
    let (mut rd, mut wr) = tokio::io::split(server);

    let mut stdin = Vec::new();
    if !IGNORES_STDIN.contains(&config.entrypoint[0].as_str()) {
        let _ = rd.read_to_end(&mut stdin).await;
    }

    let invocation = Invocation {
        argv: config.entrypoint.clone(),
        env: config.env.clone(),
        working_dir: config.working_dir.clone(),
        stdin,
    };
    let Some(outcome) = program(&invocation) else {
        return std::future::pending().await;
    };

    for chunk in outcome.chunks {
        let bytes = match chunk {
            Chunk::Stdout(payload) => frame(1, &payload),
            Chunk::Stderr(payload) => frame(2, &payload),
            Chunk::Raw(bytes) => bytes,
        };
        if wr.write_all(&bytes).await.is_err() {
            break;
        }
    }
    let _ = wr.shutdown().await;
    outcome.code
}

/// Encode one frame of the engine's multiplexed stream.
pub fn frame(selector: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![selector, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn builtin_programs() -> HashMap<String, Program> {
    let mut programs: HashMap<String, Program> = HashMap::new();

    programs.insert(
        "echo".into(),
        Arc::new(|inv: &Invocation| {
            let line = format!("{}\n", inv.argv[1..].join(" "));
            Some(Outcome::exit(0).out(line))
        }),
    );
    programs.insert(
        "cat".into(),
        Arc::new(|inv: &Invocation| Some(Outcome::exit(0).out(inv.stdin.clone()))),
    );
    programs.insert(
        "pwd".into(),
        Arc::new(|inv: &Invocation| {
            let dir = match inv.working_dir.as_str() {
                "" => "/",
                dir => dir,
            };
            Some(Outcome::exit(0).out(format!("{dir}\n")))
        }),
    );
    programs.insert(
        "env".into(),
        Arc::new(|inv: &Invocation| {
            let text: String = inv.env.iter().map(|e| format!("{e}\n")).collect();
            Some(Outcome::exit(0).out(text))
        }),
    );
    programs.insert(
        "greet".into(),
        Arc::new(|_: &Invocation| Some(Outcome::exit(0).out("hello\n"))),
    );
    programs.insert("true".into(), Arc::new(|_: &Invocation| Some(Outcome::exit(0))));
    programs.insert("false".into(), Arc::new(|_: &Invocation| Some(Outcome::exit(1))));
    programs.insert("sleep".into(), Arc::new(|_: &Invocation| -> Option<Outcome> { None }));
    programs.insert(
        "garbage".into(),
        Arc::new(|_: &Invocation| {
            let mut bytes = frame(1, b"before\n");
            bytes.extend_from_slice(&[9, 0, 0, 0, 0, 0, 0, 1, b'x']);
            Some(Outcome {
                chunks: vec![Chunk::Raw(bytes)],
                code: 0,
            })
        }),
    );
    programs.insert(
        "tty-echo".into(),
        Arc::new(|inv: &Invocation| {
            let text = format!("{}\r\n", inv.argv[1..].join(" "));
            Some(Outcome {
                chunks: vec![Chunk::Raw(text.into_bytes())],
                code: 0,
            })
        }),
    );
    programs.insert(
        "blob".into(),
        Arc::new(|inv: &Invocation| {
            let total: usize = inv.argv[1].parse().unwrap();
            let mut outcome = Outcome::exit(0);
            let mut written = 0;
            while written < total {
                let n = (total - written).min(10_000);
                let chunk: Vec<u8> = (written..written + n).map(|i| (i % 251) as u8).collect();
                outcome = outcome.out(chunk);
                written += n;
            }
            Some(outcome)
        }),
    );
    programs.insert("sh".into(), Arc::new(run_script));

    programs
}

/// Understands `sh -c` scripts made of `echo X`, `>&2 echo X` and `exit N`
/// statements separated by `;`.
fn run_script(inv: &Invocation) -> Option<Outcome> {
    assert_eq!(inv.argv.get(1).map(String::as_str), Some("-c"));
    let mut outcome = Outcome::exit(0);

    for statement in inv.argv[2].split(';').map(str::trim) {
        if statement.is_empty() {
            continue;
        }
        if let Some(code) = statement.strip_prefix("exit ") {
            outcome.code = code.trim().parse().unwrap();
            return Some(outcome);
        }
        if let Some(text) = statement.strip_prefix(">&2 echo ") {
            outcome = outcome.err(format!("{text}\n"));
        } else if let Some(text) = statement.strip_prefix("echo ") {
            outcome = outcome.out(format!("{text}\n"));
        } else {
            panic!("unsupported statement: {statement}");
        }
    }
    Some(outcome)
}

/// Options for a plain busybox container.
pub fn base_options() -> CreateContainerOptions {
    CreateContainerOptions::with_image("busybox")
}

/// A fresh strategy over [`base_options`].
pub fn base_strategy() -> ByCreatingContainer {
    ByCreatingContainer::new(base_options()).unwrap()
}

/// Build a command on `engine` with a fresh base strategy.
pub fn command(engine: &FakeEngine, path: &str, args: &[&str]) -> Command {
    executor(engine).command(base_strategy(), path, args.iter().copied())
}

pub fn executor(engine: &FakeEngine) -> CommandExecutor {
    CommandExecutor::from_engine(engine.clone())
}
