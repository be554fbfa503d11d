//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::{Stream, StreamExt};
use openapi_server::models::{
    ApiResponse, DeployAccepted, DeployRequest, EventFormat, EventsQuery, HealthResponse,
    HistoryQuery, LogsQuery, VersionResponse,
};

use crate::errors::ShipyardError;
use crate::models::event::ProgressEvent;
use crate::models::job::DeploymentJob;
use crate::models::project::{ProjectConfig, ServerConfig};
use crate::server::errors::ApiError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// History entries returned when no limit is given
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Largest history page
pub const MAX_HISTORY_LIMIT: usize = 1000;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError(ShipyardError::ValidationError(e.body_text())))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "shipyard".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

pub async fn put_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    body: Result<Json<ProjectConfig>, JsonRejection>,
) -> ApiResult<crate::models::project::Project> {
    let config = json_body(body)?;
    let project = state.control.register(&name, config).await?;
    Ok(Json(ApiResponse::ok(
        format!("project {} registered", name),
        project,
    )))
}

pub async fn delete_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    let project = state.control.delete(&name).await?;
    Ok(Json(ApiResponse::message(format!(
        "project {} removed from the registry; containers and files on {} were not touched",
        name, project.server.host
    ))))
}

pub async fn list_projects_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Vec<crate::models::project::Project>> {
    let projects = state.control.list().await;
    Ok(Json(ApiResponse::ok(
        format!("{} projects", projects.len()),
        projects,
    )))
}

fn accepted(job: DeploymentJob, message: String) -> impl IntoResponse {
    let body = ApiResponse::ok(
        message,
        DeployAccepted {
            job_id: job.id,
            project_name: job.project_name,
            branch: job.branch,
        },
    );
    (StatusCode::ACCEPTED, Json(body))
}

/// Trigger a deployment. The body is optional.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: DeployRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DeployRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ShipyardError::ValidationError(format!("invalid deploy request: {}", e)))?
    };

    let job = state.control.deploy(&name, request.branch).await?;
    let message = format!("deployment of {} started on branch {}", name, job.branch);
    Ok(accepted(job, message))
}

pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.control.rollback(&name).await?;
    let message = format!("rollback of {} started", name);
    Ok(accepted(job, message))
}

pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<crate::ops::ProjectStatus> {
    let status = state.control.project_status(&name).await?;
    let message = if status.reachable {
        format!("{} is {}", name, status.container_status)
    } else {
        format!("{} is unreachable", status.host)
    };
    Ok(Json(ApiResponse::ok(message, status)))
}

pub async fn history_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<DeploymentJob>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    let jobs = state.control.history(&name, limit).await;
    Ok(Json(ApiResponse::ok(
        format!("{} deployments", jobs.len()),
        jobs,
    )))
}

pub async fn environment_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<crate::ops::EnvironmentSnapshot> {
    let snapshot = state.control.environment(&name).await?;
    Ok(Json(ApiResponse::ok(
        format!("{} variables", snapshot.variables.len()),
        snapshot,
    )))
}

pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<openapi_server::models::LogsResponse> {
    let logs = state.control.logs(&name, query.lines).await?;
    Ok(Json(ApiResponse::ok(
        format!("last {} lines of {}", logs.lines, name),
        logs,
    )))
}

pub async fn preflight_handler(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<crate::ops::PreflightReport> {
    let report = state.control.preflight(&name).await?;
    let message = if report.passed {
        format!("{} is ready to deploy", name)
    } else {
        format!("{} failed pre-deployment checks", name)
    };
    Ok(Json(ApiResponse::ok(message, report)))
}

pub async fn active_jobs_handler(State(state): State<Arc<ServerState>>) -> ApiResult<Vec<DeploymentJob>> {
    let jobs = state.control.active();
    Ok(Json(ApiResponse::ok(
        format!("{} active jobs", jobs.len()),
        jobs,
    )))
}

pub async fn job_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> ApiResult<DeploymentJob> {
    let job = state.control.job(&job_id).await?;
    Ok(Json(ApiResponse::ok(format!("job {}", job.id), job)))
}

pub async fn test_connection_handler(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<ServerConfig>, JsonRejection>,
) -> ApiResult<openapi_server::models::ConnectionTestResponse> {
    let server = json_body(body)?;
    let result = state.control.test_connection(&server).await?;
    Ok(Json(ApiResponse::ok(
        format!("connected to {} in {} ms", result.host, result.elapsed_ms),
        result,
    )))
}

/// Encode an event for the SSE stream
pub fn sse_event(event: &ProgressEvent, format: EventFormat) -> Event {
    let name = if event.is_log() { "log" } else { "progress" };
    let data = match format {
        EventFormat::Json => serde_json::to_string(event).unwrap_or_default(),
        // SSE cannot carry carriage returns
        EventFormat::Line => event.to_wire_line().replace('\r', ""),
    };
    Event::default().event(name).data(data)
}

/// Live progress events, optionally for one project
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let format = query.format;
    let subscription = state.control.subscribe(query.project);
    let stream = subscription.map(move |event| Ok(sse_event(&event, format)));

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}
