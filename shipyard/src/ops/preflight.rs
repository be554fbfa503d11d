//! Checks run before deploying to catch host problems early

use serde::{Deserialize, Serialize};

use crate::errors::ShipyardError;
use crate::models::project::Project;
use crate::ops::ControlPlane;
use crate::remote::{close_within, commands, RemoteError, TimedSession};

/// Disk usage percentage from which a warning is raised
pub const DISK_USAGE_WARNING: u8 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,

    /// Passed, but worth a look
    #[serde(default)]
    pub warning: bool,

    pub message: String,
}

impl PreflightCheck {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            warning: false,
            message: message.into(),
        }
    }

    fn warn(name: &str, message: impl Into<String>) -> Self {
        Self {
            warning: true,
            ..Self::pass(name, message)
        }
    }

    fn fail(name: &str, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(name, message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub project: String,

    /// Every check passed
    pub passed: bool,

    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    fn new(project: &str, checks: Vec<PreflightCheck>) -> Self {
        Self {
            project: project.to_string(),
            passed: checks.iter().all(|c| c.passed),
            checks,
        }
    }
}

async fn check_git(session: &TimedSession<'_>, project: &Project) -> PreflightCheck {
    const NAME: &str = "git repository";
    match session.run(&commands::git_status(&project.path)).await {
        Ok(output) if output.trimmed().is_empty() => PreflightCheck::pass(NAME, "clean working tree"),
        Ok(_) => PreflightCheck::warn(NAME, "uncommitted changes in the working tree"),
        Err(RemoteError::Command { output, .. }) if output.contains("not a git repository") => {
            PreflightCheck::fail(NAME, format!("{} is not a git repository", project.path))
        }
        Err(e) => PreflightCheck::fail(NAME, format!("git status failed: {}", e)),
    }
}

async fn check_files(session: &TimedSession<'_>, project: &Project) -> PreflightCheck {
    const NAME: &str = "required files";
    let mut missing = Vec::new();
    for file in [project.compose_file.as_str()] {
        if session
            .run(&commands::file_exists(&project.path, file))
            .await
            .is_err()
        {
            missing.push(file);
        }
    }

    if missing.is_empty() {
        PreflightCheck::pass(NAME, "all required files present")
    } else {
        PreflightCheck::fail(NAME, format!("missing: {}", missing.join(", ")))
    }
}

async fn check_docker(session: &TimedSession<'_>) -> PreflightCheck {
    const NAME: &str = "docker";
    if session.run(commands::docker_info()).await.is_err() {
        return PreflightCheck::fail(NAME, "docker daemon is not running");
    }
    if session.run(commands::compose_version()).await.is_err() {
        return PreflightCheck::fail(NAME, "docker compose is not installed");
    }
    PreflightCheck::pass(NAME, "docker and docker compose available")
}

async fn check_disk(session: &TimedSession<'_>, project: &Project) -> PreflightCheck {
    const NAME: &str = "disk space";
    let usage = match session.run(&commands::disk_usage(&project.path)).await {
        Ok(output) => output.trimmed().parse::<u8>().ok(),
        Err(_) => None,
    };
    match usage {
        Some(percent) if percent >= DISK_USAGE_WARNING => {
            PreflightCheck::warn(NAME, format!("disk usage is high: {}%", percent))
        }
        Some(percent) => PreflightCheck::pass(NAME, format!("disk usage: {}%", percent)),
        None => PreflightCheck::warn(NAME, "could not read disk usage"),
    }
}

impl ControlPlane {
    /// Validate a project's host before deploying.
    ///
    /// A failed connection is reported as a failed check; remaining checks
    /// are skipped.
    pub async fn preflight(&self, name: &str) -> Result<PreflightReport, ShipyardError> {
        let project = self.projects.get(name).await?;

        let session = match self.connect(&project.server).await {
            Ok(session) => session,
            Err(e) => {
                let check = PreflightCheck::fail("ssh connection", e.to_string());
                return Ok(PreflightReport::new(name, vec![check]));
            }
        };

        let limit = self.engine.settings().health_probe_timeout();
        let timed = TimedSession::new(session.as_ref(), limit);
        let checks = vec![
            PreflightCheck::pass("ssh connection", format!("connected to {}", timed.host())),
            check_git(&timed, &project).await,
            check_files(&timed, &project).await,
            check_docker(&timed).await,
            check_disk(&timed, &project).await,
        ];
        close_within(session.as_ref(), limit).await;

        Ok(PreflightReport::new(name, checks))
    }
}
