//! Operations offered to clients, composed from the registries, the engine
//! and the remote executor.

pub mod inspect;
pub mod preflight;

use std::sync::Arc;

use tracing::info;

use crate::deploy::DeploymentEngine;
use crate::errors::ShipyardError;
use crate::events::{EventBus, Subscription};
use crate::http::HttpClient;
use crate::jobs::JobRegistry;
use crate::models::job::DeploymentJob;
use crate::models::project::{Project, ProjectConfig, ServerConfig};
use crate::registry::ProjectRegistry;
use crate::remote::{RemoteExecutor, RemoteSession};
use crate::storage::settings::EngineSettings;

pub use inspect::{EnvironmentSnapshot, HealthStatus, ProjectStatus};
pub use preflight::{PreflightCheck, PreflightReport};

/// Entry point for every client-facing operation
#[derive(Clone)]
pub struct ControlPlane {
    projects: Arc<ProjectRegistry>,
    jobs: JobRegistry,
    bus: EventBus,
    executor: Arc<dyn RemoteExecutor>,
    engine: DeploymentEngine,
    http: HttpClient,
}

impl ControlPlane {
    pub fn new(
        projects: Arc<ProjectRegistry>,
        jobs: JobRegistry,
        bus: EventBus,
        executor: Arc<dyn RemoteExecutor>,
        settings: EngineSettings,
        http: HttpClient,
    ) -> Self {
        let engine = DeploymentEngine::new(
            projects.clone(),
            jobs.clone(),
            bus.clone(),
            executor.clone(),
            settings,
        );
        Self {
            projects,
            jobs,
            bus,
            executor,
            engine,
            http,
        }
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn engine(&self) -> &DeploymentEngine {
        &self.engine
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Open a session bounded by the connect timeout
    pub(crate) async fn connect(
        &self,
        server: &ServerConfig,
    ) -> Result<Box<dyn RemoteSession>, ShipyardError> {
        let limit = self.engine.settings().connect_timeout();
        match tokio::time::timeout(limit, self.executor.connect(server)).await {
            Ok(session) => Ok(session?),
            Err(_) => Err(ShipyardError::Timeout(format!(
                "connecting to {} did not finish within {:?}",
                server.destination(),
                limit
            ))),
        }
    }

    /// Create or replace a project
    pub async fn register(&self, name: &str, config: ProjectConfig) -> Result<Project, ShipyardError> {
        self.projects.put(name, config).await
    }

    /// Remove a project's registration. Containers, files and the checkout on
    /// the host stay as they are.
    pub async fn delete(&self, name: &str) -> Result<Project, ShipyardError> {
        if let Some(job) = self.jobs.active_for(name) {
            return Err(ShipyardError::Conflict(format!(
                "project {} has an active job ({})",
                name, job.id
            )));
        }
        let project = self.projects.delete(name).await?;
        info!("project {} unregistered, remote resources left untouched", name);
        Ok(project)
    }

    pub async fn list(&self) -> Vec<Project> {
        self.projects.list().await
    }

    /// Start a deployment and return the accepted job
    pub async fn deploy(
        &self,
        name: &str,
        branch: Option<String>,
    ) -> Result<DeploymentJob, ShipyardError> {
        let handle = self.engine.start(name, branch).await?;
        Ok(handle.job)
    }

    /// Start a rollback and return the accepted job
    pub async fn rollback(&self, name: &str) -> Result<DeploymentJob, ShipyardError> {
        let handle = self.engine.start_rollback(name).await?;
        Ok(handle.job)
    }

    /// Finished jobs of a project, newest first
    pub async fn history(&self, name: &str, limit: usize) -> Vec<DeploymentJob> {
        self.jobs.history(name, limit).await
    }

    pub fn active(&self) -> Vec<DeploymentJob> {
        self.jobs.list_active()
    }

    pub async fn job(&self, job_id: &str) -> Result<DeploymentJob, ShipyardError> {
        self.jobs
            .find(job_id)
            .await
            .ok_or_else(|| ShipyardError::NotFound(format!("job {} not found", job_id)))
    }

    pub fn subscribe(&self, project: Option<String>) -> Subscription {
        self.bus.subscribe(project)
    }
}
