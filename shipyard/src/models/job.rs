//! Deployment job models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;

/// Ordered phases of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Connect,
    Pull,
    Build,
    Health,
}

impl Step {
    /// All steps in execution order
    pub const ALL: [Step; 4] = [Step::Connect, Step::Pull, Step::Build, Step::Health];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Connect => "connect",
            Step::Pull => "pull",
            Step::Build => "build",
            Step::Health => "health",
        }
    }

    /// Step following this one, `None` after health
    pub fn next(&self) -> Option<Step> {
        match self {
            Step::Connect => Some(Step::Pull),
            Step::Pull => Some(Step::Build),
            Step::Build => Some(Step::Health),
            Step::Health => None,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the job still holds its project's permit
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn is_final(&self) -> bool {
        !self.is_active()
    }
}

/// What a job does to the project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[default]
    Deploy,
    Rollback,
}

/// Commit checked out by a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub subject: String,
}

/// One execution attempt for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub id: String,

    pub project_name: String,

    /// Branch used for this attempt
    pub branch: String,

    #[serde(default)]
    pub kind: JobKind,

    pub status: JobStatus,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    pub current_step: Step,

    #[serde(default)]
    pub commit: Option<CommitInfo>,

    /// Failure description, only set on failed jobs
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub error_kind: Option<ErrorKind>,

    /// Tail of the messages emitted while the job ran
    #[serde(default)]
    pub log: Vec<String>,
}

impl DeploymentJob {
    /// Create a pending job
    pub fn new(project_name: &str, branch: &str, kind: JobKind) -> Self {
        Self {
            id: crate::utils::generate_uuid(),
            project_name: project_name.to_string(),
            branch: branch.to_string(),
            kind,
            status: JobStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            current_step: Step::Connect,
            commit: None,
            error: None,
            error_kind: None,
            log: Vec::new(),
        }
    }

    /// Append a message, keeping at most `max_lines` entries
    pub fn push_log(&mut self, line: String, max_lines: usize) {
        self.log.push(line);
        if self.log.len() > max_lines {
            let excess = self.log.len() - max_lines;
            self.log.drain(..excess);
        }
    }

    /// Mark the job completed
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(at);
        self.error = None;
        self.error_kind = None;
    }

    /// Mark the job failed at its current step
    pub fn fail(&mut self, at: DateTime<Utc>, kind: ErrorKind, error: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(at);
        self.error_kind = Some(kind);
        self.error = Some(error);
    }
}
