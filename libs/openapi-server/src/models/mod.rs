//! Shipyard API models

use serde::{Deserialize, Serialize};

/// Envelope returned by every API operation.
///
/// `message` is meant for humans and is always present, so a dashboard can
/// show it without knowing the server's error taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,

    /// Machine-readable error tag (e.g. `ConflictError`), only on failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying a payload
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_kind: None,
            data: Some(data),
        }
    }

    /// Failed response
    pub fn failure(message: impl Into<String>, error_kind: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_kind: Some(error_kind.into()),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    /// Successful response with nothing but a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_kind: None,
            data: None,
        }
    }
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Body of a deploy trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Branch override; the project's default branch is used when absent
    #[serde(default)]
    pub branch: Option<String>,
}

/// Returned when a deployment has been accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAccepted {
    pub job_id: String,
    pub project_name: String,
    pub branch: String,
}

/// Query for deploy history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Query for container logs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<u32>,
}

/// Container log tail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub lines: u32,
    pub logs: String,
}

/// Encoding of events pushed over the SSE stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventFormat {
    #[default]
    Json,
    Line,
}

/// Query for the event stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsQuery {
    /// Only deliver events for this project
    pub project: Option<String>,

    #[serde(default)]
    pub format: EventFormat,
}

/// Result of probing a candidate server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResponse {
    pub host: String,
    pub reachable: bool,
    pub elapsed_ms: u64,

    /// Output of the remote test command
    pub output: String,
}
