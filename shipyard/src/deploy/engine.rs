//! Deployment engine
//!
//! Runs one job per call on its own task: connect, pull, build, health.
//! Every step reports `started` and then exactly one of `success` or
//! `failed`; the first failure ends the job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::deploy::emitter::StepEmitter;
use crate::deploy::fsm::{JobEvent, JobFsm};
use crate::deploy::health;
use crate::errors::ShipyardError;
use crate::events::EventBus;
use crate::jobs::{JobPermit, JobRegistry};
use crate::models::job::{DeploymentJob, JobKind, JobStatus, Step};
use crate::models::project::Project;
use crate::registry::ProjectRegistry;
use crate::remote::{close_within, commands, RemoteExecutor, RemoteSession, TimedSession};
use crate::storage::settings::EngineSettings;

/// A job accepted by the engine
pub struct DeploymentHandle {
    /// Snapshot taken when the job was accepted
    pub job: DeploymentJob,
    task: JoinHandle<DeploymentJob>,
}

impl DeploymentHandle {
    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    /// Wait for the job to finish
    pub async fn wait(self) -> Result<DeploymentJob, ShipyardError> {
        self.task
            .await
            .map_err(|e| ShipyardError::Internal(format!("job task failed: {}", e)))
    }
}

#[derive(Clone)]
pub struct DeploymentEngine {
    projects: Arc<ProjectRegistry>,
    jobs: JobRegistry,
    bus: EventBus,
    executor: Arc<dyn RemoteExecutor>,
    settings: EngineSettings,
}

impl DeploymentEngine {
    pub fn new(
        projects: Arc<ProjectRegistry>,
        jobs: JobRegistry,
        bus: EventBus,
        executor: Arc<dyn RemoteExecutor>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            projects,
            jobs,
            bus,
            executor,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Accept a deployment of `name` and run it in the background.
    ///
    /// Unknown projects, invalid branches and a job already running for the
    /// project are reported here, before anything touches the host.
    pub async fn start(
        &self,
        name: &str,
        branch: Option<String>,
    ) -> Result<DeploymentHandle, ShipyardError> {
        let project = self.projects.get(name).await?;
        let branch = branch
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| project.branch.clone());
        if !commands::is_valid_branch(&branch) {
            return Err(ShipyardError::ValidationError(format!(
                "invalid branch name: {:?}",
                branch
            )));
        }

        self.spawn(project, &branch, JobKind::Deploy)
    }

    /// Deploy and wait for the outcome
    pub async fn deploy(
        &self,
        name: &str,
        branch: Option<String>,
    ) -> Result<DeploymentJob, ShipyardError> {
        self.start(name, branch).await?.wait().await
    }

    /// Return the project to the commit recorded before its last pull and
    /// rebuild it. Holds the project's slot like a deployment.
    pub async fn start_rollback(&self, name: &str) -> Result<DeploymentHandle, ShipyardError> {
        let project = self.projects.get(name).await?;
        let branch = project.branch.clone();
        self.spawn(project, &branch, JobKind::Rollback)
    }

    fn spawn(
        &self,
        project: Project,
        branch: &str,
        kind: JobKind,
    ) -> Result<DeploymentHandle, ShipyardError> {
        let permit = self.jobs.try_acquire(&project.name, branch, kind)?;
        let job = permit.job().ok_or_else(|| {
            ShipyardError::Internal(format!("job {} vanished", permit.job_id()))
        })?;
        info!(
            "accepted {:?} job {} for {} on branch {}",
            kind, job.id, project.name, branch
        );

        let engine = self.clone();
        let task = tokio::spawn(async move { engine.run(project, permit).await });
        Ok(DeploymentHandle { job, task })
    }

    async fn run(self, project: Project, permit: JobPermit) -> DeploymentJob {
        let emitter = StepEmitter::new(&self.bus, &permit, self.settings.max_job_log_lines);
        let mut fsm = JobFsm::new();
        let mut session: Option<Box<dyn RemoteSession>> = None;

        permit.update(|job| job.status = JobStatus::Running);
        if let Err(e) = fsm.process(JobEvent::Begin) {
            error!("job {}: {}", permit.job_id(), e);
        }

        let outcome = self
            .run_steps(&project, &permit, &emitter, &mut fsm, &mut session)
            .await;

        let container_status = match (&outcome, session.as_deref()) {
            (Ok(()), Some(session)) => Some(self.container_status(&project, session).await),
            _ => None,
        };

        if let Some(session) = session.take() {
            close_within(session.as_ref(), self.settings.health_probe_timeout()).await;
        }

        let finished_at = Utc::now();
        match &outcome {
            Ok(()) => {
                permit.update(|job| job.complete(finished_at));
                let status = container_status.unwrap_or("unknown");
                if let Err(e) = self
                    .projects
                    .record_deploy(&project.name, finished_at, status)
                    .await
                {
                    warn!("could not update project {}: {}", project.name, e);
                }
                info!("[{}] job {} completed", project.name, permit.job_id());
            }
            Err(e) => {
                permit.update(|job| job.fail(finished_at, e.kind(), e.to_string()));
                warn!(
                    "[{}] job {} failed at {}: {}",
                    project.name,
                    permit.job_id(),
                    fsm.step(),
                    e
                );
            }
        }

        let fallback = permit.job();
        match self.jobs.finish(permit).await {
            Ok(job) => job,
            Err(e) => {
                error!("could not archive job: {}", e);
                fallback.unwrap_or_else(|| {
                    let mut job = DeploymentJob::new(&project.name, &project.branch, JobKind::Deploy);
                    job.fail(finished_at, e.kind(), e.to_string());
                    job
                })
            }
        }
    }

    async fn run_steps(
        &self,
        project: &Project,
        permit: &JobPermit,
        emitter: &StepEmitter<'_>,
        fsm: &mut JobFsm,
        session: &mut Option<Box<dyn RemoteSession>>,
    ) -> Result<(), ShipyardError> {
        let job = permit
            .job()
            .ok_or_else(|| ShipyardError::Internal("job vanished".to_string()))?;

        for step in Step::ALL {
            let result = match step {
                Step::Connect => {
                    emitter.started(
                        step,
                        format!(
                            "Connecting to {}:{}",
                            project.server.destination(),
                            project.server.port
                        ),
                    );
                    let connected = self
                        .watchdog(step, self.settings.connect_timeout(), async {
                            self.executor
                                .connect(&project.server)
                                .await
                                .map_err(ShipyardError::from)
                        })
                        .await;
                    connected.map(|s| {
                        let message = format!("Connected to {}", s.host());
                        *session = Some(s);
                        message
                    })
                }
                _ => {
                    let active = session
                        .as_deref()
                        .ok_or_else(|| ShipyardError::Internal("no session".to_string()))?;
                    self.run_remote_step(step, project, &job, permit, emitter, active)
                        .await
                }
            };

            match result {
                Ok(message) => {
                    emitter.success(step, message);
                    fsm.process(JobEvent::StepSucceeded)
                        .map_err(ShipyardError::Internal)?;
                }
                Err(e) => {
                    emitter.failed(step, &e);
                    fsm.process(JobEvent::StepFailed(e.to_string()))
                        .map_err(ShipyardError::Internal)?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn run_remote_step(
        &self,
        step: Step,
        project: &Project,
        job: &DeploymentJob,
        permit: &JobPermit,
        emitter: &StepEmitter<'_>,
        session: &dyn RemoteSession,
    ) -> Result<String, ShipyardError> {
        match step {
            Step::Connect => Err(ShipyardError::Internal(
                "connect runs without a session".to_string(),
            )),
            Step::Pull => {
                let started = match job.kind {
                    JobKind::Deploy => format!("Updating {} to branch {}", project.path, job.branch),
                    JobKind::Rollback => format!("Rolling back {}", project.path),
                };
                emitter.started(step, started);
                self.watchdog(
                    step,
                    self.settings.step_timeout(),
                    self.pull(project, job, permit, emitter, session),
                )
                .await
            }
            Step::Build => {
                emitter.started(
                    step,
                    format!("Rebuilding containers from {}", project.compose_file),
                );
                self.watchdog(
                    step,
                    self.settings.step_timeout(),
                    self.build(project, emitter, session),
                )
                .await
            }
            Step::Health => {
                let started = match &project.health_check {
                    Some(check) => format!("Checking health: {}", check),
                    None => "Checking health".to_string(),
                };
                emitter.started(step, started);
                let Some(check) = project.health_check()? else {
                    return Ok("No health check configured, skipping".to_string());
                };

                let budget = self.settings.health_timeout()
                    + self.settings.health_probe_timeout()
                    + Duration::from_secs(5);
                self.watchdog(
                    step,
                    budget,
                    health::wait_healthy(session, project, &check, &self.settings, |n, reason| {
                        emitter.log(step, &format!("probe {} failed: {}", n, reason))
                    }),
                )
                .await
            }
        }
    }

    async fn pull(
        &self,
        project: &Project,
        job: &DeploymentJob,
        permit: &JobPermit,
        emitter: &StepEmitter<'_>,
        session: &dyn RemoteSession,
    ) -> Result<String, ShipyardError> {
        let forward = |line: &str| emitter.log(Step::Pull, line);

        match job.kind {
            JobKind::Deploy => {
                if self.settings.backup_before_pull {
                    match session.run(&commands::backup(&project.path)).await {
                        Ok(_) => emitter.log(Step::Pull, "Recorded current commit for rollback"),
                        Err(e) => {
                            emitter.log(Step::Pull, &format!("Backup skipped: {}", e));
                        }
                    }
                }
                session
                    .run_streaming(&commands::git_pull(&project.path, &job.branch), &forward)
                    .await?;
            }
            JobKind::Rollback => {
                session
                    .run_streaming(&commands::rollback(&project.path), &forward)
                    .await?;
            }
        }

        let commit = match session.run(&commands::current_commit(&project.path)).await {
            Ok(output) => commands::parse_commit(&output.stdout),
            Err(e) => {
                emitter.log(Step::Pull, &format!("Could not read commit: {}", e));
                None
            }
        };
        permit.update(|job| job.commit = commit.clone());

        if job.kind == JobKind::Deploy {
            for file in &project.sync_files {
                let remote = project.remote_path(&file.remote);
                if session.transfer_if_needed(&file.local, &remote).await? {
                    emitter.log(Step::Pull, &format!("Uploaded {}", remote));
                } else {
                    emitter.log(Step::Pull, &format!("{} is up to date", remote));
                }
            }
        }

        Ok(match commit {
            Some(commit) => format!("At {} {}", commit.hash, commit.subject),
            None => format!("Updated {}", project.path),
        })
    }

    async fn build(
        &self,
        project: &Project,
        emitter: &StepEmitter<'_>,
        session: &dyn RemoteSession,
    ) -> Result<String, ShipyardError> {
        let forward = |line: &str| emitter.log(Step::Build, line);

        let down = commands::compose_down(&project.path, &project.compose_file);
        if let Err(e) = session.run_streaming(&down, &forward).await {
            emitter.log(Step::Build, &format!("Stopping containers failed, continuing: {}", e));
        }

        let up = commands::compose_up(&project.path, &project.compose_file);
        session.run_streaming(&up, &forward).await?;

        Ok("Containers rebuilt and started".to_string())
    }

    async fn container_status(&self, project: &Project, session: &dyn RemoteSession) -> &'static str {
        let session = TimedSession::new(session, self.settings.health_probe_timeout());
        match session
            .run(&commands::compose_ps(&project.path, &project.compose_file))
            .await
        {
            Ok(output) => commands::parse_container_status(&output.stdout),
            Err(e) => {
                warn!("[{}] could not read container status: {}", project.name, e);
                "unknown"
            }
        }
    }

    /// Bound a step, surfacing overruns as timeouts
    async fn watchdog<T, F>(&self, step: Step, limit: Duration, fut: F) -> Result<T, ShipyardError>
    where
        F: Future<Output = Result<T, ShipyardError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ShipyardError::Timeout(format!(
                "{} step did not finish within {:?}",
                step, limit
            ))),
        }
    }
}
