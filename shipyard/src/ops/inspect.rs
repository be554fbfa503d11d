//! Read-only queries against a project's host

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use openapi_server::models::{ConnectionTestResponse, LogsResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ShipyardError;
use crate::models::job::{CommitInfo, DeploymentJob};
use crate::models::project::{HealthCheck, Project, ServerConfig};
use crate::ops::ControlPlane;
use crate::remote::{close_within, commands, TimedSession};

/// Default number of log lines returned
pub const DEFAULT_LOG_LINES: u32 = 100;

/// Largest accepted log tail
pub const MAX_LOG_LINES: u32 = 10_000;

/// Result of a health check run for a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub check: String,
    pub healthy: bool,
    pub detail: String,
}

/// Live view of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStatus {
    pub name: String,
    pub host: String,
    pub path: String,
    pub branch: String,

    /// Whether a session could be opened
    pub reachable: bool,

    /// `running`, `stopped` or `unknown`
    pub container_status: String,

    pub commit: Option<CommitInfo>,
    pub last_deploy: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub health: Option<HealthStatus>,
    pub active_job: Option<DeploymentJob>,

    /// Why the host could not be inspected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Variables of the project's environment file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub project: String,
    pub variables: BTreeMap<String, String>,
}

/// URLs naming the deployment host itself are probed from the host
fn is_loopback(url: &url::Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

impl ControlPlane {
    /// Container state, checked-out commit and health of a project.
    ///
    /// An unreachable host is reported in the status, not as an error.
    pub async fn project_status(&self, name: &str) -> Result<ProjectStatus, ShipyardError> {
        let project = self.projects.get(name).await?;
        let active_job = self.jobs.active_for(name);

        let mut status = ProjectStatus {
            name: project.name.clone(),
            host: project.server.host.clone(),
            path: project.path.clone(),
            branch: project.branch.clone(),
            reachable: false,
            container_status: "unknown".to_string(),
            commit: None,
            last_deploy: project.last_deploy,
            last_status: project.last_status.clone(),
            health: None,
            active_job,
            error: None,
        };

        let session = match self.connect(&project.server).await {
            Ok(session) => session,
            Err(e) => {
                warn!("status of {}: {}", name, e);
                status.error = Some(e.to_string());
                return Ok(status);
            }
        };
        status.reachable = true;

        let limit = self.engine.settings().health_probe_timeout();
        let timed = TimedSession::new(session.as_ref(), limit);
        let observed = match timed
            .run(&commands::compose_ps(&project.path, &project.compose_file))
            .await
        {
            Ok(output) => {
                status.container_status = commands::parse_container_status(&output.stdout).to_string();
                true
            }
            Err(e) => {
                status.error = Some(e.to_string());
                false
            }
        };

        if let Ok(output) = timed.run(&commands::current_commit(&project.path)).await {
            status.commit = commands::parse_commit(&output.stdout);
        }

        status.health = self.check_health(&project, &timed).await;
        close_within(session.as_ref(), limit).await;

        // a failed ps says nothing about the containers
        if observed {
            match self.projects.record_status(name, &status.container_status).await {
                Ok(updated) => status.last_status = updated.last_status,
                Err(e) => debug!("status of {} not recorded: {}", name, e),
            }
        }

        Ok(status)
    }

    async fn check_health(&self, project: &Project, session: &TimedSession<'_>) -> Option<HealthStatus> {
        let raw = project.health_check.clone()?;
        let check = match project.health_check() {
            Ok(Some(check)) => check,
            Ok(None) => return None,
            Err(e) => {
                return Some(HealthStatus {
                    check: raw,
                    healthy: false,
                    detail: e.to_string(),
                })
            }
        };

        let (healthy, detail) = match &check {
            HealthCheck::Url(url) if !is_loopback(url) => {
                let probe = self.http.probe(url).await;
                let detail = match (probe.status_code, &probe.error) {
                    (Some(code), _) => format!("HTTP {} in {} ms", code, probe.elapsed_ms),
                    (None, Some(error)) => error.clone(),
                    (None, None) => "no response".to_string(),
                };
                (probe.healthy, detail)
            }
            _ => {
                let timeout = self.engine.settings().health_probe_timeout();
                match crate::deploy::health::probe(session.inner(), project, &check, timeout).await {
                    Ok(detail) => (true, detail),
                    Err(detail) => (false, detail),
                }
            }
        };

        Some(HealthStatus {
            check: raw,
            healthy,
            detail,
        })
    }

    /// Variables from `.env.production`, or `.env` when it is absent
    pub async fn environment(&self, name: &str) -> Result<EnvironmentSnapshot, ShipyardError> {
        let project = self.projects.get(name).await?;
        let session = self.connect(&project.server).await?;
        let limit = self.engine.settings().step_timeout();
        let result = TimedSession::new(session.as_ref(), limit)
            .run(&commands::read_env(&project.path))
            .await;
        close_within(session.as_ref(), limit).await;

        let output = result?;
        Ok(EnvironmentSnapshot {
            project: project.name,
            variables: commands::parse_env_file(&output.stdout),
        })
    }

    /// Tail of the project's container logs
    pub async fn logs(&self, name: &str, lines: Option<u32>) -> Result<LogsResponse, ShipyardError> {
        let lines = lines.unwrap_or(DEFAULT_LOG_LINES);
        if lines == 0 || lines > MAX_LOG_LINES {
            return Err(ShipyardError::ValidationError(format!(
                "lines must be between 1 and {}",
                MAX_LOG_LINES
            )));
        }

        let project = self.projects.get(name).await?;
        let session = self.connect(&project.server).await?;
        let limit = self.engine.settings().step_timeout();
        let result = TimedSession::new(session.as_ref(), limit)
            .run(&commands::compose_logs(&project.path, &project.compose_file, lines))
            .await;
        close_within(session.as_ref(), limit).await;

        Ok(LogsResponse {
            lines,
            logs: result?.stdout,
        })
    }

    /// Check that a server accepts a session and runs commands
    pub async fn test_connection(
        &self,
        server: &ServerConfig,
    ) -> Result<ConnectionTestResponse, ShipyardError> {
        server.validate()?;

        let started = Instant::now();
        let session = self.connect(server).await?;
        let limit = self.engine.settings().step_timeout();
        let result = TimedSession::new(session.as_ref(), limit)
            .run(commands::connection_test())
            .await;
        close_within(session.as_ref(), limit).await;
        let output = result?;

        Ok(ConnectionTestResponse {
            host: server.host.clone(),
            reachable: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
            output: output.trimmed().to_string(),
        })
    }
}
