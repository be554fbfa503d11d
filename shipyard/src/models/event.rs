//! Progress event models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;
use crate::models::job::Step;

/// Outcome marker of a step transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Success,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Started => "started",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
        }
    }
}

/// Event emitted while a job runs.
///
/// Structured step transitions carry a `step_status`; forwarded remote output
/// lines leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub project_name: String,
    pub step: Step,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_status: Option<StepStatus>,

    pub message: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ProgressEvent {
    /// Step transition event
    pub fn progress(
        job_id: &str,
        project_name: &str,
        step: Step,
        status: StepStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            project_name: project_name.to_string(),
            step,
            step_status: Some(status),
            message: message.into(),
            timestamp: Utc::now(),
            error_kind: None,
        }
    }

    /// Forwarded output line
    pub fn log(job_id: &str, project_name: &str, step: Step, line: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            project_name: project_name.to_string(),
            step,
            step_status: None,
            message: line.into(),
            timestamp: Utc::now(),
            error_kind: None,
        }
    }

    pub fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn is_log(&self) -> bool {
        self.step_status.is_none()
    }

    /// Line-oriented encoding for text clients
    pub fn to_wire_line(&self) -> String {
        match self.step_status {
            Some(status) => format!(
                "[PROGRESS] {}:{} {}|{}|{}",
                self.project_name,
                self.job_id,
                self.step,
                status.as_str(),
                self.message
            ),
            None => format!(
                "[LOG] {}:{} {}|{}",
                self.project_name, self.job_id, self.step, self.message
            ),
        }
    }
}
