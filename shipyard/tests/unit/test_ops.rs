//! Control plane operations against a scripted host

use std::time::Duration;

use shipyard::errors::ErrorKind;
use shipyard::models::project::ProjectConfig;
use shipyard::remote::RemoteError;
use shipyard::workers::status_poller;

use crate::common::{project_config, server, Harness};

#[tokio::test]
async fn test_delete_never_touches_the_host() {
    let h = Harness::with_api().await;

    h.control.delete("api").await.unwrap();

    assert!(h.fake.untouched());
    assert_eq!(
        h.control.projects().get("api").await.unwrap_err().kind(),
        ErrorKind::NotFoundError
    );
    assert_eq!(
        h.control.delete("api").await.unwrap_err().kind(),
        ErrorKind::NotFoundError
    );
}

#[tokio::test]
async fn test_delete_is_refused_while_a_job_runs() {
    let h = Harness::with_api().await;
    let gate = h.fake.hold("git fetch");
    let handle = h.control.engine().start("api", None).await.unwrap();
    gate.reached().await;

    let err = h.control.delete("api").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictError);

    gate.open();
    handle.wait().await.unwrap();
    h.control.delete("api").await.unwrap();
}

#[tokio::test]
async fn test_status_of_unreachable_host() {
    let h = Harness::with_api().await;
    h.fake
        .fail_connect(RemoteError::Network("No route to host".to_string()));

    let status = h.control.project_status("api").await.unwrap();
    assert!(!status.reachable);
    assert_eq!(status.container_status, "unknown");
    assert!(status.error.unwrap().contains("No route to host"));
    assert!(h.control.projects().get("api").await.unwrap().last_status.is_none());
}

#[tokio::test]
async fn test_status_reports_containers_commit_and_health() {
    let h = Harness::new();
    h.control
        .register(
            "api",
            ProjectConfig {
                health_check: Some("test -f /srv/api/ready".to_string()),
                ..project_config("/srv/api")
            },
        )
        .await
        .unwrap();
    h.fake
        .on("ps --format json", r#"{"State":"exited"}"#)
        .on("git log -1", "a1b2c3d|Fix login");

    let status = h.control.project_status("api").await.unwrap();

    assert!(status.reachable);
    assert_eq!(status.container_status, "stopped");
    assert_eq!(status.commit.unwrap().subject, "Fix login");
    assert!(status.health.unwrap().healthy);
    assert_eq!(status.last_status.as_deref(), Some("stopped"));
    assert_eq!(h.fake.close_count(), 1);
}

#[tokio::test]
async fn test_status_query_gives_up_on_a_stalled_host() {
    let h = Harness::with_api().await;
    h.fake
        .delay("ps --format json", Duration::from_secs(3600))
        .on("git log -1", "a1b2c3d|Fix login");

    tokio::time::pause();
    let status = h.control.project_status("api").await.unwrap();

    assert!(status.reachable);
    assert_eq!(status.container_status, "unknown");
    assert!(status.error.unwrap().contains("timed out"));
    assert_eq!(status.commit.unwrap().hash, "a1b2c3d");
    assert!(h.control.projects().get("api").await.unwrap().last_status.is_none());
}

#[tokio::test]
async fn test_failed_ps_keeps_the_recorded_status() {
    let h = Harness::with_api().await;
    h.control.projects().record_status("api", "running").await.unwrap();
    h.fake.fail_command("ps --format json", "permission denied");

    let status = h.control.project_status("api").await.unwrap();

    assert!(status.reachable);
    assert_eq!(status.container_status, "unknown");
    assert_eq!(status.last_status.as_deref(), Some("running"));
    assert_eq!(
        h.control.projects().get("api").await.unwrap().last_status.as_deref(),
        Some("running")
    );
}

#[tokio::test]
async fn test_stalled_environment_read_times_out() {
    let h = Harness::with_api().await;
    h.fake.delay(".env.production", Duration::from_secs(3600));

    tokio::time::pause();
    let err = h.control.environment("api").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TimeoutError);
    assert_eq!(h.fake.close_count(), 1);
}

#[tokio::test]
async fn test_environment_snapshot() {
    let h = Harness::with_api().await;
    h.fake.on(
        ".env.production",
        "# production\nDATABASE_URL=\"postgres://db/api\"\nexport PORT=8080\nnot a var\n",
    );

    let env = h.control.environment("api").await.unwrap();
    assert_eq!(env.variables.len(), 2);
    assert_eq!(env.variables["DATABASE_URL"], "postgres://db/api");
    assert_eq!(env.variables["PORT"], "8080");
}

#[tokio::test]
async fn test_logs_validate_line_count() {
    let h = Harness::with_api().await;
    h.fake.on("logs --no-color", "web-1  | listening on :8080\n");

    let err = h.control.logs("api", Some(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(h.fake.untouched());

    let logs = h.control.logs("api", None).await.unwrap();
    assert_eq!(logs.lines, 100);
    assert!(logs.logs.contains("listening"));
    assert!(h.fake.ran("--tail 100"));
}

#[tokio::test]
async fn test_preflight_reports_each_check() {
    let h = Harness::with_api().await;
    h.fake
        .fail_command("docker info", "Cannot connect to the Docker daemon")
        .on("df", "93");

    let report = h.control.preflight("api").await.unwrap();
    assert!(!report.passed);

    let check = |name: &str| report.checks.iter().find(|c| c.name == name).unwrap();
    assert!(check("ssh connection").passed);
    assert!(check("git repository").passed);
    assert!(!check("docker").passed);
    assert!(check("disk space").passed);
    assert!(check("disk space").warning);
}

#[tokio::test]
async fn test_connection_test() {
    let h = Harness::new();
    h.fake.on("connection test", "connection test");

    let result = h.control.test_connection(&server()).await.unwrap();
    assert!(result.reachable);
    assert_eq!(result.output, "connection test");

    let mut bad = server();
    bad.user = String::new();
    let err = h.control.test_connection(&bad).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[tokio::test]
async fn test_status_poller_skips_projects_with_running_jobs() {
    let h = Harness::with_api().await;
    h.control.register("web", project_config("/srv/web")).await.unwrap();
    h.fake.on("ps --format json", "running");

    let gate = h.fake.hold("git fetch");
    let handle = h.control.engine().start("api", None).await.unwrap();
    gate.reached().await;

    assert_eq!(status_poller::poll_once(&h.control).await, 1);
    assert_eq!(
        h.control.projects().get("web").await.unwrap().last_status.as_deref(),
        Some("running")
    );

    gate.open();
    handle.wait().await.unwrap();
}
