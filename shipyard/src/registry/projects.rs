//! Durable store of project definitions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::ShipyardError;
use crate::filesys::file::File;
use crate::models::project::{validate_project_name, Project, ProjectConfig};

/// Projects keyed by name.
///
/// Every mutation rewrites `projects.json` atomically before it becomes
/// visible to readers. Nothing here contacts a remote host.
pub struct ProjectRegistry {
    projects: RwLock<BTreeMap<String, Project>>,
    file: Option<File>,
}

impl ProjectRegistry {
    pub fn in_memory() -> Self {
        Self {
            projects: RwLock::new(BTreeMap::new()),
            file: None,
        }
    }

    /// Load the registry from `file`, starting empty when it does not exist
    pub async fn open(file: File) -> Result<Self, ShipyardError> {
        let projects: BTreeMap<String, Project> = file.read_json_or_default().await?;
        info!(
            "loaded {} projects from {}",
            projects.len(),
            file.path().display()
        );
        Ok(Self {
            projects: RwLock::new(projects),
            file: Some(file),
        })
    }

    async fn persist(&self, projects: &BTreeMap<String, Project>) -> Result<(), ShipyardError> {
        if let Some(file) = &self.file {
            file.write_json(projects).await?;
        }
        Ok(())
    }

    /// Create or replace a project.
    ///
    /// `last_deploy` and `last_status` survive a replacement since they are
    /// observations rather than configuration.
    pub async fn put(&self, name: &str, config: ProjectConfig) -> Result<Project, ShipyardError> {
        validate_project_name(name)?;
        config.validate()?;

        let mut projects = self.projects.write().await;
        let mut project = Project::from_config(name, config);
        if let Some(existing) = projects.get(name) {
            project.last_deploy = existing.last_deploy;
            project.last_status = existing.last_status.clone();
        }

        let mut next = projects.clone();
        next.insert(name.to_string(), project.clone());
        self.persist(&next).await?;
        *projects = next;

        info!("registered project {}", name);
        Ok(project)
    }

    pub async fn get(&self, name: &str) -> Result<Project, ShipyardError> {
        self.projects
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ShipyardError::NotFound(format!("project {} is not registered", name)))
    }

    /// All projects ordered by name
    pub async fn list(&self) -> Vec<Project> {
        self.projects.read().await.values().cloned().collect()
    }

    /// Remove a project's metadata. Deployed resources are left untouched.
    pub async fn delete(&self, name: &str) -> Result<Project, ShipyardError> {
        let mut projects = self.projects.write().await;
        if !projects.contains_key(name) {
            return Err(ShipyardError::NotFound(format!(
                "project {} is not registered",
                name
            )));
        }

        let mut next = projects.clone();
        let removed = next.remove(name);
        self.persist(&next).await?;
        *projects = next;

        info!("removed project {} from the registry", name);
        removed.ok_or_else(|| ShipyardError::Internal(format!("project {} vanished", name)))
    }

    async fn modify<F>(&self, name: &str, f: F) -> Result<Project, ShipyardError>
    where
        F: FnOnce(&mut Project),
    {
        let mut projects = self.projects.write().await;
        let mut next = projects.clone();
        let project = next
            .get_mut(name)
            .ok_or_else(|| ShipyardError::NotFound(format!("project {} is not registered", name)))?;
        f(project);
        let updated = project.clone();

        self.persist(&next).await?;
        *projects = next;
        Ok(updated)
    }

    /// Record a successful deployment
    pub async fn record_deploy(
        &self,
        name: &str,
        at: DateTime<Utc>,
        status: &str,
    ) -> Result<Project, ShipyardError> {
        self.modify(name, |project| {
            project.last_deploy = Some(at);
            project.last_status = Some(status.to_string());
        })
        .await
    }

    /// Record an observed container status
    pub async fn record_status(&self, name: &str, status: &str) -> Result<Project, ShipyardError> {
        self.modify(name, |project| {
            project.last_status = Some(status.to_string());
        })
        .await
    }
}
