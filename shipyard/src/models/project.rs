//! Project models

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ShipyardError;
use crate::remote::commands::{is_safe_path, is_valid_branch};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default branch deployed when a project does not name one
pub const DEFAULT_BRANCH: &str = "main";

/// Default compose definition
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";

/// Reference to the credential used to open a session.
///
/// Only a reference is stored; secrets are resolved when connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Keys offered by the local ssh agent or default identity files
    #[default]
    Agent,

    /// Private key file on the daemon's host
    KeyFile { path: PathBuf },

    /// Name of an environment variable holding the password
    PasswordEnv { var: String },
}

/// Remote server a project is deployed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub user: String,

    #[serde(default)]
    pub credential: Credential,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl ServerConfig {
    /// `user@host` destination understood by ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Validate the connection parameters
    pub fn validate(&self) -> Result<(), ShipyardError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ShipyardError::ValidationError(
                "server host is required".to_string(),
            ));
        }
        if host.starts_with('-') || !host.chars().all(is_host_char) {
            return Err(ShipyardError::ValidationError(format!(
                "invalid server host: {}",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(ShipyardError::ValidationError(
                "server port must be between 1 and 65535".to_string(),
            ));
        }
        if self.user.trim().is_empty() {
            return Err(ShipyardError::ValidationError(
                "server user is required".to_string(),
            ));
        }
        if self.user.starts_with('-') || !self.user.chars().all(is_user_char) {
            return Err(ShipyardError::ValidationError(format!(
                "invalid server user: {}",
                self.user
            )));
        }
        match &self.credential {
            Credential::Agent => {}
            Credential::KeyFile { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ShipyardError::ValidationError(
                        "key file credential needs a path".to_string(),
                    ));
                }
            }
            Credential::PasswordEnv { var } => {
                if var.is_empty() || !var.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(ShipyardError::ValidationError(format!(
                        "invalid password environment variable name: {}",
                        var
                    )));
                }
            }
        }
        Ok(())
    }
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']' | '_')
}

fn is_user_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// A local file pushed to the host when its content differs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFile {
    /// Path on the daemon's host
    pub local: PathBuf,

    /// Destination, relative paths are resolved against the project path
    pub remote: String,
}

/// How a health check is performed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheck {
    /// HTTP(S) endpoint, healthy on 2xx/3xx
    Url(url::Url),

    /// Shell command run in the project directory, healthy on exit 0
    Command(String),
}

impl HealthCheck {
    /// Interpret a configured health check string
    pub fn parse(raw: &str) -> Result<Option<Self>, ShipyardError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            let url = url::Url::parse(raw).map_err(|e| {
                ShipyardError::ValidationError(format!("invalid health check URL {}: {}", raw, e))
            })?;
            if url.host_str().is_none() {
                return Err(ShipyardError::ValidationError(format!(
                    "health check URL has no host: {}",
                    raw
                )));
            }
            return Ok(Some(HealthCheck::Url(url)));
        }
        Ok(Some(HealthCheck::Command(raw.to_string())))
    }
}

/// Registration payload for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub server: ServerConfig,

    pub path: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default = "default_compose_file", alias = "docker_compose")]
    pub compose_file: String,

    #[serde(default)]
    pub health_check: Option<String>,

    #[serde(default)]
    pub sync_files: Vec<SyncFile>,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

fn default_compose_file() -> String {
    DEFAULT_COMPOSE_FILE.to_string()
}

impl ProjectConfig {
    /// Validate the configuration before it reaches the registry
    pub fn validate(&self) -> Result<(), ShipyardError> {
        self.server.validate()?;

        if self.path.trim().is_empty() {
            return Err(ShipyardError::ValidationError(
                "project path is required".to_string(),
            ));
        }
        if !is_safe_path(&self.path) {
            return Err(ShipyardError::ValidationError(format!(
                "invalid project path: {}",
                self.path
            )));
        }
        if !is_valid_branch(&self.branch) {
            return Err(ShipyardError::ValidationError(format!(
                "invalid branch name: {:?}",
                self.branch
            )));
        }
        if !is_safe_path(&self.compose_file) {
            return Err(ShipyardError::ValidationError(format!(
                "invalid compose file: {:?}",
                self.compose_file
            )));
        }
        if let Some(check) = &self.health_check {
            HealthCheck::parse(check)?;
        }
        for file in &self.sync_files {
            if file.local.as_os_str().is_empty() || !is_safe_path(&file.remote) {
                return Err(ShipyardError::ValidationError(format!(
                    "invalid sync file entry: {} -> {}",
                    file.local.display(),
                    file.remote
                )));
            }
        }
        Ok(())
    }
}

/// Validate a project name used as registry key
pub fn validate_project_name(name: &str) -> Result<(), ShipyardError> {
    if name.is_empty() {
        return Err(ShipyardError::ValidationError(
            "project name is required".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ShipyardError::ValidationError(format!(
            "invalid project name: {:?}",
            name
        )));
    }
    Ok(())
}

/// A registered project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,

    pub server: ServerConfig,

    /// Repository path on the remote host
    pub path: String,

    /// Default branch for deployments
    pub branch: String,

    pub compose_file: String,

    #[serde(default)]
    pub health_check: Option<String>,

    #[serde(default)]
    pub sync_files: Vec<SyncFile>,

    /// Completion time of the last successful deployment
    #[serde(default)]
    pub last_deploy: Option<DateTime<Utc>>,

    /// Last observed container status
    #[serde(default)]
    pub last_status: Option<String>,
}

impl Project {
    /// Build a project from its registration payload
    pub fn from_config(name: &str, config: ProjectConfig) -> Self {
        Self {
            name: name.to_string(),
            server: config.server,
            path: config.path,
            branch: config.branch,
            compose_file: config.compose_file,
            health_check: config.health_check.filter(|c| !c.trim().is_empty()),
            sync_files: config.sync_files,
            last_deploy: None,
            last_status: None,
        }
    }

    /// Parsed health check, if one is configured
    pub fn health_check(&self) -> Result<Option<HealthCheck>, ShipyardError> {
        match &self.health_check {
            Some(raw) => HealthCheck::parse(raw),
            None => Ok(None),
        }
    }

    /// Resolve a sync destination against the project path
    pub fn remote_path(&self, remote: &str) -> String {
        if remote.starts_with('/') {
            remote.to_string()
        } else {
            format!("{}/{}", self.path.trim_end_matches('/'), remote)
        }
    }
}
