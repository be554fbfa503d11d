//! Remote executor backed by the system `ssh` and `scp` binaries
//!
//! Password credentials go through `sshpass -e` so the secret travels in the
//! child's environment, never on its command line.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::models::project::{Credential, ServerConfig};
use crate::remote::commands;
use crate::remote::{CommandOutput, LineSink, RemoteError, RemoteExecutor, RemoteSession};
use crate::utils::sha256_hex;

/// Exit status ssh reserves for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// sshpass exit status for a rejected password
const SSHPASS_BAD_PASSWORD_EXIT: i32 = 5;

const AUTH_MARKERS: [&str; 4] = [
    "Permission denied",
    "Authentication failed",
    "Host key verification failed",
    "Too many authentication failures",
];

/// Maximum bytes of command output carried in an error
const ERROR_OUTPUT_LIMIT: usize = 4096;

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
    pub connect_timeout: Duration,
    /// Value of ssh's `StrictHostKeyChecking` option
    pub strict_host_key_checking: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            sshpass_program: "sshpass".to_string(),
            connect_timeout: Duration::from_secs(10),
            strict_host_key_checking: "accept-new".to_string(),
        }
    }
}

/// Opens [`SshSession`]s
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(&self, server: &ServerConfig) -> Result<Box<dyn RemoteSession>, RemoteError> {
        let password = match &server.credential {
            Credential::PasswordEnv { var } => {
                let value = std::env::var(var).map_err(|_| {
                    RemoteError::Auth(format!("password variable {} is not set", var))
                })?;
                Some(SecretString::from(value))
            }
            _ => None,
        };

        let session = SshSession {
            server: server.clone(),
            options: self.options.clone(),
            password,
        };

        debug!("opening ssh session to {}", server.destination());
        let probe = session.run("echo connection-ok");
        match tokio::time::timeout(self.options.connect_timeout, probe).await {
            Ok(Ok(_)) => {}
            Ok(Err(RemoteError::Command { output, .. })) => {
                return Err(RemoteError::Network(output));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(RemoteError::Timeout(self.options.connect_timeout)),
        }
        info!("ssh session established to {}", server.destination());

        Ok(Box::new(session))
    }
}

/// Session on one host.
///
/// OpenSSH has no persistent handle here: every command spawns a fresh
/// `ssh` process with the same connection parameters.
pub struct SshSession {
    server: ServerConfig,
    options: SshOptions,
    password: Option<SecretString>,
}

impl SshSession {
    /// Base command for `program`, wrapped in sshpass for password credentials
    fn command(&self, program: &str, port_flag: &str) -> Command {
        let mut cmd = match &self.password {
            Some(password) => {
                let mut cmd = Command::new(&self.options.sshpass_program);
                cmd.arg("-e")
                    .arg(program)
                    .env("SSHPASS", password.expose_secret());
                cmd
            }
            None => {
                let mut cmd = Command::new(program);
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        };

        cmd.arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.options.connect_timeout.as_secs().max(1)
            ))
            .arg("-o")
            .arg(format!(
                "StrictHostKeyChecking={}",
                self.options.strict_host_key_checking
            ))
            .arg(port_flag)
            .arg(self.server.port.to_string());

        if let Credential::KeyFile { path } = &self.server.credential {
            cmd.arg("-i").arg(path).arg("-o").arg("IdentitiesOnly=yes");
        }

        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn ssh(&self, remote_command: &str) -> Command {
        let mut cmd = self.command(&self.options.ssh_program, "-p");
        cmd.arg(self.server.destination()).arg(remote_command);
        cmd
    }

    fn spawn_error(&self, program: &str, err: std::io::Error) -> RemoteError {
        RemoteError::Network(format!("failed to start {}: {}", program, err))
    }

    /// Map a failed exit status onto the transport taxonomy
    fn classify(&self, command: &str, code: Option<i32>, stderr: &str, stdout: &str) -> RemoteError {
        let password_rejected = self.password.is_some() && code == Some(SSHPASS_BAD_PASSWORD_EXIT);
        if password_rejected || AUTH_MARKERS.iter().any(|m| stderr.contains(m)) {
            return RemoteError::Auth(truncate(stderr.trim()));
        }
        if code == Some(SSH_ERROR_EXIT) {
            return RemoteError::Network(truncate(stderr.trim()));
        }

        let output = if stderr.trim().is_empty() { stdout } else { stderr };
        RemoteError::Command {
            command: command.to_string(),
            exit_code: code,
            output: truncate(output.trim()),
        }
    }

    fn finish(&self, command: &str, output: Output) -> Result<CommandOutput, RemoteError> {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(CommandOutput {
                exit_code: 0,
                stdout,
            });
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(self.classify(command, output.status.code(), &stderr, &stdout))
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= ERROR_OUTPUT_LIMIT {
        return text.to_string();
    }
    let mut start = text.len() - ERROR_OUTPUT_LIMIT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.server.host
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        debug!("[{}] $ {}", self.server.host, command);
        let output = self
            .ssh(command)
            .output()
            .await
            .map_err(|e| self.spawn_error(&self.options.ssh_program, e))?;
        self.finish(command, output)
    }

    async fn run_streaming(
        &self,
        command: &str,
        on_line: &LineSink<'_>,
    ) -> Result<CommandOutput, RemoteError> {
        debug!("[{}] $ {} (streaming)", self.server.host, command);
        let mut child = self
            .ssh(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(&self.options.ssh_program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RemoteError::Network("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RemoteError::Network("stderr not captured".to_string()))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_done = false;
        let mut err_done = false;
        let mut collected_out = String::new();
        let mut collected_err = String::new();

        // docker writes build progress to stderr, so both streams are forwarded
        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        collected_out.push_str(&line);
                        collected_out.push('\n');
                    }
                    _ => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        collected_err.push_str(&line);
                        collected_err.push('\n');
                    }
                    _ => err_done = true,
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        if status.success() {
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: collected_out,
            });
        }
        Err(self.classify(command, status.code(), &collected_err, &collected_out))
    }

    async fn transfer_if_needed(&self, local: &Path, remote: &str) -> Result<bool, RemoteError> {
        let contents = tokio::fs::read(local)
            .await
            .map_err(|e| RemoteError::Transfer(format!("{}: {}", local.display(), e)))?;
        let local_hash = sha256_hex(&contents);

        let remote_hash = self.run(&commands::remote_sha256(remote)).await?;
        if remote_hash.trimmed() == local_hash {
            debug!("{} is up to date on {}", remote, self.server.host);
            return Ok(false);
        }

        if let Some(mkdir) = commands::ensure_parent_dir(remote) {
            self.run(&mkdir).await?;
        }

        let mut scp = self.command(&self.options.scp_program, "-P");
        scp.arg("-q")
            .arg(local)
            .arg(format!("{}:{}", self.server.destination(), remote));
        let output = scp
            .output()
            .await
            .map_err(|e| self.spawn_error(&self.options.scp_program, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return match self.classify("scp", output.status.code(), &stderr, "") {
                RemoteError::Command { output, .. } => Err(RemoteError::Transfer(output)),
                other => Err(other),
            };
        }

        info!("copied {} to {}:{}", local.display(), self.server.host, remote);
        Ok(true)
    }

    async fn close(&self) {
        debug!("closing ssh session to {}", self.server.host);
    }
}
