//! Deployment engine scenarios

use std::time::Duration;

use shipyard::errors::{ErrorKind, ShipyardError};
use shipyard::models::event::StepStatus;
use shipyard::models::job::{JobKind, JobStatus, Step};
use shipyard::models::project::SyncFile;
use shipyard::remote::RemoteError;

use crate::common::{drain, project_config, Harness};

fn progress(events: &[shipyard::models::event::ProgressEvent]) -> Vec<(Step, StepStatus)> {
    events
        .iter()
        .filter_map(|e| e.step_status.map(|s| (e.step, s)))
        .collect()
}

#[tokio::test]
async fn test_pull_failure_fails_job_at_pull() {
    let h = Harness::with_api().await;
    h.fake
        .fail("git fetch", RemoteError::Network("network unreachable".to_string()));
    let mut events = h.control.subscribe(Some("api".to_string()));

    let job = h.control.engine().deploy("api", None).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, Step::Pull);
    assert!(job.error.as_deref().unwrap().contains("network unreachable"));
    assert_eq!(job.error_kind, Some(ErrorKind::ConnectionError));
    assert!(job.completed_at.is_some());

    // build never started
    assert!(!h.fake.ran("up -d --build"));

    let events = drain(&mut events);
    let failed = events
        .iter()
        .find(|e| e.step_status == Some(StepStatus::Failed))
        .unwrap();
    assert_eq!(failed.step, Step::Pull);
    assert_eq!(failed.error_kind, Some(ErrorKind::ConnectionError));
    assert!(failed.message.contains("network unreachable"));

    // failures leave the project's observations alone
    let project = h.control.projects().get("api").await.unwrap();
    assert!(project.last_status.is_none());
    assert!(project.last_deploy.is_none());

    assert!(h.control.active().is_empty());
    assert_eq!(h.control.history("api", 10).await.len(), 1);
    assert_eq!(h.fake.close_count(), 1);
}

#[tokio::test]
async fn test_successful_deploy_runs_steps_in_order() {
    let h = Harness::with_api().await;
    h.control
        .register(
            "api",
            shipyard::models::project::ProjectConfig {
                health_check: Some("http://localhost:8080/health".to_string()),
                ..project_config("/srv/api")
            },
        )
        .await
        .unwrap();
    h.fake
        .on("git log -1", "a1b2c3d|Add health endpoint")
        .on("ps --format json", r#"{"Name":"api-web-1","State":"running"}"#)
        .on("curl", "200");
    let mut events = h.control.subscribe(None);

    let job = h.control.engine().deploy("api", None).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.current_step, Step::Health);
    assert!(job.error.is_none());
    assert_eq!(job.commit.as_ref().unwrap().hash, "a1b2c3d");

    let expected: Vec<(Step, StepStatus)> = Step::ALL
        .iter()
        .flat_map(|s| [(*s, StepStatus::Started), (*s, StepStatus::Success)])
        .collect();
    assert_eq!(progress(&drain(&mut events)), expected);

    let fetch = h.fake.position("git fetch").unwrap();
    let up = h.fake.position("up -d --build").unwrap();
    let curl = h.fake.position("curl").unwrap();
    assert!(fetch < up && up < curl);
    assert!(h.fake.position("rev-parse HEAD").unwrap() < fetch);

    let project = h.control.projects().get("api").await.unwrap();
    assert_eq!(project.last_status.as_deref(), Some("running"));
    assert_eq!(project.last_deploy, job.completed_at);
}

#[tokio::test]
async fn test_overlapping_deploy_is_rejected() {
    let h = Harness::with_api().await;
    let gate = h.fake.hold("git fetch");

    let first = h.control.engine().start("api", None).await.unwrap();
    gate.reached().await;

    let err = h.control.deploy("api", None).await.unwrap_err();
    assert!(matches!(err, ShipyardError::Conflict(_)));
    assert_eq!(h.control.active().len(), 1);

    gate.open();
    let job = first.wait().await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    // the slot is free again
    let again = h.control.engine().deploy("api", None).await.unwrap();
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(h.control.history("api", 10).await.len(), 2);
}

#[tokio::test]
async fn test_unknown_project_and_bad_branch_fail_before_any_job() {
    let h = Harness::with_api().await;

    let err = h.control.deploy("web", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundError);

    let err = h
        .control
        .deploy("api", Some("main; reboot".to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    assert!(h.fake.untouched());
    assert!(h.control.history("api", 10).await.is_empty());
}

#[tokio::test]
async fn test_branch_override_is_deployed() {
    let h = Harness::with_api().await;
    let job = h
        .control
        .engine()
        .deploy("api", Some("release/1.2".to_string()))
        .await
        .unwrap();

    assert_eq!(job.branch, "release/1.2");
    assert!(h.fake.ran("git fetch origin 'release/1.2'"));
}

#[tokio::test]
async fn test_connect_failure_stops_at_connect() {
    let h = Harness::with_api().await;
    h.fake
        .fail_connect(RemoteError::Auth("Permission denied (publickey)".to_string()));

    let job = h.control.engine().deploy("api", None).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, Step::Connect);
    assert_eq!(job.error_kind, Some(ErrorKind::ConnectionError));
    assert!(h.fake.commands().is_empty());
}

#[tokio::test]
async fn test_failing_health_check_times_out() {
    let h = Harness::with_api().await;
    h.control
        .register(
            "api",
            shipyard::models::project::ProjectConfig {
                health_check: Some("curl -fs localhost:8080/health".to_string()),
                ..project_config("/srv/api")
            },
        )
        .await
        .unwrap();
    h.fake.fail_command("curl -fs", "connection refused");

    let job = h.control.engine().deploy("api", None).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, Step::Health);
    assert_eq!(job.error_kind, Some(ErrorKind::HealthCheckError));
    assert!(job.log.iter().any(|l| l.contains("probe 1 failed")));
}

#[tokio::test]
async fn test_slow_build_hits_the_watchdog() {
    let h = Harness::with_api().await;
    h.fake.delay("up -d --build", Duration::from_secs(30));

    tokio::time::pause();
    let job = h.control.engine().deploy("api", None).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, Step::Build);
    assert_eq!(job.error_kind, Some(ErrorKind::TimeoutError));
}

#[tokio::test]
async fn test_failed_down_does_not_stop_the_build() {
    let h = Harness::with_api().await;
    h.fake
        .fail_command("down --remove-orphans", "no such service");

    let job = h.control.engine().deploy("api", None).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    let down = h.fake.position("down --remove-orphans").unwrap();
    let up = h.fake.position("up -d --build").unwrap();
    assert!(down < up);
    assert!(job.log.iter().any(|l| l.contains("Stopping containers failed")));
}

#[tokio::test]
async fn test_failed_up_fails_the_build() {
    let h = Harness::with_api().await;
    h.fake.fail_command("up -d --build", "pull access denied");

    let job = h.control.engine().deploy("api", None).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_step, Step::Build);
    assert_eq!(job.error_kind, Some(ErrorKind::ExecutionError));
    assert!(h.fake.position("down --remove-orphans").unwrap() < h.fake.position("up -d --build").unwrap());
    assert!(h.control.active().is_empty());
}

#[tokio::test]
async fn test_stalled_status_read_still_releases_the_project() {
    let h = Harness::with_api().await;
    h.fake.delay("ps --format json", Duration::from_secs(3600));

    tokio::time::pause();
    let job = h.control.engine().deploy("api", None).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(h.control.active().is_empty());
    assert_eq!(h.fake.close_count(), 1);
    let project = h.control.projects().get("api").await.unwrap();
    assert_eq!(project.last_status.as_deref(), Some("unknown"));
}

#[tokio::test]
async fn test_build_output_is_forwarded_as_log_events() {
    let h = Harness::with_api().await;
    h.fake.on("up -d --build", "Creating api-web-1\nStarted api-web-1\n");
    let mut events = h.control.subscribe(Some("api".to_string()));

    let job = h.control.engine().deploy("api", None).await.unwrap();

    let logs: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| e.is_log() && e.step == Step::Build)
        .map(|e| e.message)
        .collect();
    assert!(logs.contains(&"Creating api-web-1".to_string()));
    assert!(logs.contains(&"Started api-web-1".to_string()));
    assert!(job.log.iter().any(|l| l.starts_with("[LOG] api:")));
}

#[tokio::test]
async fn test_sync_files_transfer_only_when_changed() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("prod.env");
    std::fs::write(&local, "PORT=8080\n").unwrap();

    let h = Harness::new();
    h.control
        .register(
            "api",
            shipyard::models::project::ProjectConfig {
                sync_files: vec![SyncFile {
                    local: local.clone(),
                    remote: ".env.production".to_string(),
                }],
                ..project_config("/srv/api")
            },
        )
        .await
        .unwrap();

    h.control.engine().deploy("api", None).await.unwrap();
    h.control.engine().deploy("api", None).await.unwrap();

    let transfers = h.fake.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].1, "/srv/api/.env.production");
}

#[tokio::test]
async fn test_rollback_runs_as_its_own_job() {
    let h = Harness::with_api().await;

    let handle = h.control.engine().start_rollback("api").await.unwrap();
    let job = handle.wait().await.unwrap();

    assert_eq!(job.kind, JobKind::Rollback);
    assert_eq!(job.status, JobStatus::Completed);
    assert!(h.fake.ran(".last_deploy_commit"));
    assert!(!h.fake.ran("git fetch"));
}
