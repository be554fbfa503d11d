//! Scripted in-memory executor for tests and dry runs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::models::project::ServerConfig;
use crate::remote::{CommandOutput, RemoteError, RemoteExecutor, RemoteSession};

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Error(RemoteError),
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    reply: Reply,
}

#[derive(Debug, Clone)]
struct Gate {
    pattern: String,
    reached: Arc<Semaphore>,
    release: Arc<Semaphore>,
}

#[derive(Debug, Default)]
struct FakeState {
    rules: Mutex<Vec<Rule>>,
    delays: Mutex<Vec<(String, Duration)>>,
    gates: Mutex<Vec<Gate>>,
    connect_error: Mutex<Option<RemoteError>>,
    commands: Mutex<Vec<String>>,
    transfers: Mutex<Vec<(PathBuf, String)>>,
    remote_files: Mutex<HashMap<String, Vec<u8>>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Executor whose hosts answer from a script.
///
/// Commands are matched by substring; the most recently added rule wins.
/// Unmatched commands succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct FakeExecutor {
    state: Arc<FakeState>,
}

/// Handle on a command held in flight by [`FakeExecutor::hold`]
#[derive(Debug, Clone)]
pub struct FakeGate {
    reached: Arc<Semaphore>,
    release: Arc<Semaphore>,
}

impl FakeGate {
    /// Wait until a matching command is running
    pub async fn reached(&self) {
        if let Ok(permit) = self.reached.acquire().await {
            permit.forget();
        }
    }

    /// Let held commands finish
    pub fn open(&self) {
        self.release.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `stdout`
    pub fn on(&self, pattern: &str, stdout: &str) -> &Self {
        lock(&self.state.rules).push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Output(stdout.to_string()),
        });
        self
    }

    /// Fail commands containing `pattern` with `error`
    pub fn fail(&self, pattern: &str, error: RemoteError) -> &Self {
        lock(&self.state.rules).push(Rule {
            pattern: pattern.to_string(),
            reply: Reply::Error(error),
        });
        self
    }

    /// Fail commands containing `pattern` with a non-zero exit
    pub fn fail_command(&self, pattern: &str, output: &str) -> &Self {
        self.fail(
            pattern,
            RemoteError::Command {
                command: pattern.to_string(),
                exit_code: Some(1),
                output: output.to_string(),
            },
        )
    }

    /// Delay commands containing `pattern`
    pub fn delay(&self, pattern: &str, delay: Duration) -> &Self {
        lock(&self.state.delays).push((pattern.to_string(), delay));
        self
    }

    /// Make every connection attempt fail
    pub fn fail_connect(&self, error: RemoteError) -> &Self {
        *lock(&self.state.connect_error) = Some(error);
        self
    }

    /// Hold commands containing `pattern` until the gate opens
    pub fn hold(&self, pattern: &str) -> FakeGate {
        let gate = Gate {
            pattern: pattern.to_string(),
            reached: Arc::new(Semaphore::new(0)),
            release: Arc::new(Semaphore::new(0)),
        };
        let handle = FakeGate {
            reached: gate.reached.clone(),
            release: gate.release.clone(),
        };
        lock(&self.state.gates).push(gate);
        handle
    }

    /// Seed a file on the fake host
    pub fn put_remote_file(&self, remote: &str, contents: &[u8]) {
        lock(&self.state.remote_files).insert(remote.to_string(), contents.to_vec());
    }

    /// Every command run so far, in order
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state.commands).clone()
    }

    /// Whether any command containing `pattern` ran
    pub fn ran(&self, pattern: &str) -> bool {
        lock(&self.state.commands).iter().any(|c| c.contains(pattern))
    }

    /// Index of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        lock(&self.state.commands)
            .iter()
            .position(|c| c.contains(pattern))
    }

    /// Files copied by `transfer_if_needed`
    pub fn transfers(&self) -> Vec<(PathBuf, String)> {
        lock(&self.state.transfers).clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// No connection was ever attempted
    pub fn untouched(&self) -> bool {
        self.connect_count() == 0 && lock(&self.state.commands).is_empty()
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn RemoteSession>, RemoteError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.state.connect_error).clone() {
            return Err(error);
        }
        Ok(Box::new(FakeSession {
            host: server.host.clone(),
            state: self.state.clone(),
        }))
    }
}

struct FakeSession {
    host: String,
    state: Arc<FakeState>,
}

impl FakeSession {
    fn reply_for(&self, command: &str) -> Reply {
        lock(&self.state.rules)
            .iter()
            .rev()
            .find(|r| command.contains(&r.pattern))
            .map(|r| r.reply.clone())
            .unwrap_or_else(|| Reply::Output(String::new()))
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        lock(&self.state.commands).push(command.to_string());

        let gate = lock(&self.state.gates)
            .iter()
            .find(|g| command.contains(&g.pattern))
            .cloned();
        if let Some(gate) = gate {
            gate.reached.add_permits(1);
            // a closed semaphore means the gate is open
            let _ = gate.release.acquire().await;
        }

        let delay = lock(&self.state.delays)
            .iter()
            .find(|(p, _)| command.contains(p.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.reply_for(command) {
            Reply::Output(stdout) => Ok(CommandOutput::new(stdout)),
            Reply::Error(error) => Err(error),
        }
    }

    async fn transfer_if_needed(&self, local: &Path, remote: &str) -> Result<bool, RemoteError> {
        let contents = tokio::fs::read(local)
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {}", local.display(), e)))?;

        let mut files = lock(&self.state.remote_files);
        if files.get(remote) == Some(&contents) {
            return Ok(false);
        }
        files.insert(remote.to_string(), contents);
        lock(&self.state.transfers).push((local.to_path_buf(), remote.to_string()));
        Ok(true)
    }

    async fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}
