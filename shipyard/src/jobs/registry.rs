//! Active jobs and deployment history
//!
//! At most one job per project is active at a time. The slot is held by a
//! [`JobPermit`] and freed when the permit is released or dropped, so a job
//! task that panics or is aborted never leaves its project locked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::ShipyardError;
use crate::filesys::file::File;
use crate::models::job::{DeploymentJob, JobKind};

type ActiveJobs = Arc<Mutex<HashMap<String, DeploymentJob>>>;

fn lock(active: &ActiveJobs) -> MutexGuard<'_, HashMap<String, DeploymentJob>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Exclusive right to run a job for one project
pub struct JobPermit {
    job_id: String,
    project: String,
    active: ActiveJobs,
    released: bool,
}

impl std::fmt::Debug for JobPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPermit")
            .field("job_id", &self.job_id)
            .field("project", &self.project)
            .field("released", &self.released)
            .finish()
    }
}

impl JobPermit {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Snapshot of the job held by this permit
    pub fn job(&self) -> Option<DeploymentJob> {
        lock(&self.active)
            .get(&self.project)
            .filter(|job| job.id == self.job_id)
            .cloned()
    }

    /// Mutate the job in place and return the updated snapshot
    pub fn update<F>(&self, f: F) -> Option<DeploymentJob>
    where
        F: FnOnce(&mut DeploymentJob),
    {
        let mut active = lock(&self.active);
        let job = active
            .get_mut(&self.project)
            .filter(|job| job.id == self.job_id)?;
        f(job);
        Some(job.clone())
    }

    /// Free the project's slot
    pub fn release(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut active = lock(&self.active);
        let owned = active
            .get(&self.project)
            .is_some_and(|job| job.id == self.job_id);
        if owned {
            active.remove(&self.project);
            debug!("released job slot of {} ({})", self.project, self.job_id);
        }
    }
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.release_slot();
    }
}

/// Append-only record of finalized jobs
struct HistoryStore {
    jobs: RwLock<Vec<DeploymentJob>>,
    file: Option<File>,
}

/// Tracks running jobs and archives finished ones
#[derive(Clone)]
pub struct JobRegistry {
    active: ActiveJobs,
    history: Arc<HistoryStore>,
}

impl JobRegistry {
    /// Registry without durable history
    pub fn in_memory() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(HistoryStore {
                jobs: RwLock::new(Vec::new()),
                file: None,
            }),
        }
    }

    /// Registry whose history is kept in a JSON-lines file
    pub async fn open(file: File) -> Result<Self, ShipyardError> {
        let jobs: Vec<DeploymentJob> = file.read_json_lines().await?;
        info!(
            "loaded {} archived jobs from {}",
            jobs.len(),
            file.path().display()
        );
        Ok(Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(HistoryStore {
                jobs: RwLock::new(jobs),
                file: Some(file),
            }),
        })
    }

    /// Claim the project's slot and create a pending job
    pub fn try_acquire(
        &self,
        project: &str,
        branch: &str,
        kind: JobKind,
    ) -> Result<JobPermit, ShipyardError> {
        let mut active = lock(&self.active);
        if let Some(running) = active.get(project) {
            return Err(ShipyardError::Conflict(format!(
                "project {} already has an active job ({})",
                project, running.id
            )));
        }

        let job = DeploymentJob::new(project, branch, kind);
        let job_id = job.id.clone();
        active.insert(project.to_string(), job);

        Ok(JobPermit {
            job_id,
            project: project.to_string(),
            active: self.active.clone(),
            released: false,
        })
    }

    /// Snapshot of running jobs, oldest first
    pub fn list_active(&self) -> Vec<DeploymentJob> {
        let mut jobs: Vec<DeploymentJob> = lock(&self.active).values().cloned().collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    pub fn active_for(&self, project: &str) -> Option<DeploymentJob> {
        lock(&self.active).get(project).cloned()
    }

    pub fn is_active(&self, project: &str) -> bool {
        lock(&self.active).contains_key(project)
    }

    /// Archive a finalized job
    pub async fn record(&self, job: &DeploymentJob) -> Result<(), ShipyardError> {
        if !job.status.is_final() {
            return Err(ShipyardError::ValidationError(format!(
                "job {} is still {:?}",
                job.id, job.status
            )));
        }

        let mut jobs = self.history.jobs.write().await;
        if let Some(file) = &self.history.file {
            file.append_json_line(job).await?;
        }
        jobs.push(job.clone());
        Ok(())
    }

    /// Archive the permit's job and free the slot.
    ///
    /// The slot is freed even when archiving fails.
    pub async fn finish(&self, permit: JobPermit) -> Result<DeploymentJob, ShipyardError> {
        let job = permit.job().ok_or_else(|| {
            ShipyardError::Internal(format!("job {} vanished", permit.job_id()))
        })?;
        let recorded = self.record(&job).await;
        permit.release();
        if let Err(e) = &recorded {
            warn!("failed to archive job {}: {}", job.id, e);
        }
        recorded.map(|_| job)
    }

    /// Finished jobs of a project, newest first
    pub async fn history(&self, project: &str, limit: usize) -> Vec<DeploymentJob> {
        let jobs = self.history.jobs.read().await;
        let mut matching: Vec<DeploymentJob> = jobs
            .iter()
            .rev()
            .filter(|job| job.project_name == project)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit);
        matching
    }

    /// Look a job up by id among active and archived jobs
    pub async fn find(&self, job_id: &str) -> Option<DeploymentJob> {
        let active = lock(&self.active)
            .values()
            .find(|job| job.id == job_id)
            .cloned();
        if active.is_some() {
            return active;
        }

        self.history
            .jobs
            .read()
            .await
            .iter()
            .rev()
            .find(|job| job.id == job_id)
            .cloned()
    }

    /// Keep only the newest `keep_per_project` jobs of each project.
    /// Returns how many jobs were dropped.
    pub async fn prune(&self, keep_per_project: usize) -> Result<usize, ShipyardError> {
        let mut jobs = self.history.jobs.write().await;

        let mut order: Vec<usize> = (0..jobs.len()).collect();
        order.sort_by(|&a, &b| jobs[b].started_at.cmp(&jobs[a].started_at).then(b.cmp(&a)));

        let mut kept_per_project: HashMap<&str, usize> = HashMap::new();
        let mut keep = vec![false; jobs.len()];
        for idx in order {
            let count = kept_per_project
                .entry(jobs[idx].project_name.as_str())
                .or_insert(0);
            if *count < keep_per_project {
                *count += 1;
                keep[idx] = true;
            }
        }

        let before = jobs.len();
        let retained: Vec<DeploymentJob> = jobs
            .iter()
            .zip(keep)
            .filter(|(_, keep)| *keep)
            .map(|(job, _)| job.clone())
            .collect();
        let removed = before - retained.len();
        if removed == 0 {
            return Ok(0);
        }

        if let Some(file) = &self.history.file {
            let mut contents = Vec::new();
            for job in &retained {
                contents.extend(serde_json::to_vec(job)?);
                contents.push(b'\n');
            }
            file.write_atomic(&contents).await?;
        }
        *jobs = retained;

        info!("pruned {} archived jobs", removed);
        Ok(removed)
    }
}
