//! Remote execution on deployment hosts
//!
//! The engine talks to hosts only through [`RemoteExecutor`] and
//! [`RemoteSession`]. Production code uses [`ssh::SshExecutor`], tests use
//! [`fake::FakeExecutor`].

pub mod commands;
pub mod fake;
pub mod ssh;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::models::project::ServerConfig;

/// Failures of the remote transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("host unreachable: {0}")]
    Network(String),

    #[error("command `{command}` failed ({}): {output}", describe_exit(.exit_code))]
    Command {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {}", code),
        None => "killed by signal".to_string(),
    }
}

/// Result of a command that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
        }
    }

    /// Stdout without surrounding whitespace
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Receives remote output one line at a time
pub type LineSink<'a> = dyn for<'l> Fn(&'l str) + Send + Sync + 'a;

/// Opens sessions to deployment hosts
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Open a session, verifying reachability and authentication
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// An authenticated session on one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Host this session is connected to
    fn host(&self) -> &str;

    /// Run a command, failing with [`RemoteError::Command`] on non-zero exit
    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Run a command, handing every output line to `on_line` as it arrives
    async fn run_streaming(
        &self,
        command: &str,
        on_line: &LineSink<'_>,
    ) -> Result<CommandOutput, RemoteError> {
        let output = self.run(command).await?;
        for line in output.stdout.lines() {
            on_line(line);
        }
        Ok(output)
    }

    /// Copy `local` to `remote` unless the remote file already has the same
    /// content. Returns whether a copy happened.
    async fn transfer_if_needed(&self, local: &Path, remote: &str) -> Result<bool, RemoteError>;

    /// Release the session
    async fn close(&self);
}

/// A borrowed session whose commands give up after a fixed limit
pub struct TimedSession<'a> {
    session: &'a dyn RemoteSession,
    limit: Duration,
}

impl<'a> TimedSession<'a> {
    pub fn new(session: &'a dyn RemoteSession, limit: Duration) -> Self {
        Self { session, limit }
    }

    pub fn host(&self) -> &str {
        self.session.host()
    }

    pub fn inner(&self) -> &'a dyn RemoteSession {
        self.session
    }

    /// Run a command, failing with [`RemoteError::Timeout`] past the limit
    pub async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        match tokio::time::timeout(self.limit, self.session.run(command)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.limit)),
        }
    }
}

/// Close a session, abandoning it if the host does not answer within `limit`
pub async fn close_within(session: &dyn RemoteSession, limit: Duration) {
    if tokio::time::timeout(limit, session.close()).await.is_err() {
        warn!("closing session to {} did not finish within {:?}", session.host(), limit);
    }
}
