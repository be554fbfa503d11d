//! HTTP API tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use shipyard::remote::RemoteError;
use shipyard::server::{router, ServerState};

use crate::common::Harness;

fn app(harness: &Harness) -> Router {
    let state = ServerState::new(harness.control.clone(), Duration::from_secs(15));
    router(Arc::new(state), false)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn api_body() -> Value {
    json!({
        "server": {"host": "10.0.0.5", "user": "deploy"},
        "path": "/srv/api",
        "health_check": "http://localhost:8080/health"
    })
}

#[tokio::test]
async fn test_health_and_version() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, Method::GET, "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_project_crud() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, Method::PUT, "/api/v1/project/api", Some(api_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["branch"], "main");
    assert_eq!(body["data"]["server"]["port"], 22);

    let (_, body) = send(&app, Method::GET, "/api/v1/projects", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&app, Method::DELETE, "/api/v1/project/api", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("not touched"));

    let (status, body) = send(&app, Method::DELETE, "/api/v1/project/api", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_kind"], "NotFoundError");

    assert!(h.fake.untouched());
}

#[tokio::test]
async fn test_invalid_registration_is_a_bad_request() {
    let h = Harness::new();
    let app = app(&h);

    let mut body = api_body();
    body["server"]["port"] = json!(0);
    let (status, body) = send(&app, Method::PUT, "/api/v1/project/api", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_kind"], "ValidationError");

    let (status, body) = send(&app, Method::PUT, "/api/v1/project/api", Some(json!({"path": 3}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_deploy_is_accepted_then_conflicts() {
    let h = Harness::new();
    let app = app(&h);
    send(&app, Method::PUT, "/api/v1/project/api", Some(api_body())).await;
    let gate = h.fake.hold("git fetch");

    // the body is optional
    let (status, body) = send(&app, Method::POST, "/api/v1/project/api/deploy", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["branch"], "main");
    let job_id = body["data"]["job_id"].as_str().unwrap().to_string();
    gate.reached().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/project/api/deploy",
        Some(json!({"branch": "develop"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_kind"], "ConflictError");

    let (_, body) = send(&app, Method::GET, "/api/v1/deploy/active", None).await;
    assert_eq!(body["data"][0]["id"], job_id.as_str());
    assert_eq!(body["data"][0]["status"], "running");

    let (status, body) = send(&app, Method::GET, &format!("/api/v1/deploy/job/{}", job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["project_name"], "api");

    gate.open();
}

#[tokio::test]
async fn test_deploy_unknown_project_and_job() {
    let h = Harness::new();
    let app = app(&h);

    let (status, _) = send(&app, Method::POST, "/api/v1/project/ghost/deploy", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/v1/deploy/job/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_after_a_deploy() {
    let h = Harness::with_api().await;
    let app = app(&h);
    h.control.engine().deploy("api", None).await.unwrap();
    h.control.engine().deploy("api", None).await.unwrap();

    let (status, body) = send(&app, Method::GET, "/api/v1/project/api/history?limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], "completed");
}

#[tokio::test]
async fn test_connection_failure_is_a_bad_gateway() {
    let h = Harness::new();
    h.fake
        .fail_connect(RemoteError::Auth("Permission denied (publickey)".to_string()));
    let app = app(&h);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/test-connection",
        Some(json!({"host": "10.0.0.5", "user": "deploy"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error_kind"], "ConnectionError");
    assert!(body["message"].as_str().unwrap().contains("Permission denied"));
}

#[tokio::test]
async fn test_status_of_unreachable_host_is_ok() {
    let h = Harness::with_api().await;
    h.fake
        .fail_connect(RemoteError::Network("timed out".to_string()));
    let app = app(&h);

    let (status, body) = send(&app, Method::GET, "/api/v1/project/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reachable"], false);
}
