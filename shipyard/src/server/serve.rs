//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::ShipyardError;
use crate::server::handlers::{
    active_jobs_handler, delete_project_handler, deploy_handler, environment_handler,
    events_handler, health_handler, history_handler, job_handler, list_projects_handler,
    logs_handler, preflight_handler, put_project_handler, rollback_handler, status_handler,
    test_connection_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the application router
pub fn router(state: Arc<ServerState>, permissive_cors: bool) -> Router {
    let api = Router::new()
        // Projects
        .route("/projects", get(list_projects_handler))
        .route(
            "/project/{name}",
            put(put_project_handler).delete(delete_project_handler),
        )
        .route("/project/{name}/deploy", post(deploy_handler))
        .route("/project/{name}/rollback", post(rollback_handler))
        .route("/project/{name}/status", get(status_handler))
        .route("/project/{name}/history", get(history_handler))
        .route("/project/{name}/environment", get(environment_handler))
        .route("/project/{name}/logs", get(logs_handler))
        .route("/project/{name}/preflight", get(preflight_handler))
        // Jobs
        .route("/deploy/active", get(active_jobs_handler))
        .route("/deploy/job/{id}", get(job_handler))
        .route("/deploy/events", get(events_handler))
        // Servers
        .route("/test-connection", post(test_connection_handler));

    let app = Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .nest("/api/v1", api)
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if permissive_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), ShipyardError>>, ShipyardError> {
    let app = router(state, options.permissive_cors);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| ShipyardError::ServerError(format!("failed to bind {}: {}", addr, e)))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ShipyardError::ServerError(e.to_string()))
    });

    Ok(handle)
}
