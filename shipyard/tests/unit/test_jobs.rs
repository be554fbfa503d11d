//! Job registry tests

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;

use shipyard::errors::ShipyardError;
use shipyard::filesys::file::File;
use shipyard::jobs::JobRegistry;
use shipyard::models::job::{DeploymentJob, JobKind, JobStatus};

fn finished(project: &str, minutes_ago: i64) -> DeploymentJob {
    let mut job = DeploymentJob::new(project, "main", JobKind::Deploy);
    job.started_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    job.complete(job.started_at + ChronoDuration::seconds(30));
    job
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_concurrent_acquire_has_one_winner(contenders in 2usize..16) {
        let registry = JobRegistry::in_memory();

        let permits: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..contenders)
                .map(|_| scope.spawn(|| registry.try_acquire("api", "main", JobKind::Deploy)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = permits.iter().filter(|p| p.is_ok()).count();
        prop_assert_eq!(winners, 1);
        prop_assert!(permits
            .iter()
            .filter_map(|p| p.as_ref().err())
            .all(|e| matches!(e, ShipyardError::Conflict(_))));

        drop(permits);
        prop_assert!(!registry.is_active("api"));
    }

    #[test]
    fn prop_history_is_bounded_and_newest_first(
        ages in proptest::collection::vec(0i64..10_000, 0..30),
        limit in 0usize..40,
    ) {
        let rt = runtime();
        let history = rt.block_on(async {
            let registry = JobRegistry::in_memory();
            for age in &ages {
                registry.record(&finished("api", *age)).await.unwrap();
                registry.record(&finished("web", *age)).await.unwrap();
            }
            registry.history("api", limit).await
        });

        prop_assert_eq!(history.len(), ages.len().min(limit));
        prop_assert!(history.iter().all(|j| j.project_name == "api"));
        prop_assert!(history
            .windows(2)
            .all(|w| w[0].started_at >= w[1].started_at));
    }
}

#[test]
fn test_release_frees_the_slot_once() {
    let registry = JobRegistry::in_memory();
    let permit = registry.try_acquire("api", "main", JobKind::Deploy).unwrap();
    assert!(registry.try_acquire("api", "main", JobKind::Deploy).is_err());

    // other projects are independent
    let web = registry.try_acquire("web", "main", JobKind::Deploy).unwrap();
    assert_eq!(registry.list_active().len(), 2);

    permit.release();
    let again = registry.try_acquire("api", "main", JobKind::Deploy).unwrap();
    assert_eq!(registry.list_active().len(), 2);

    drop(again);
    drop(web);
    assert!(registry.list_active().is_empty());
}

#[tokio::test]
async fn test_finish_archives_and_releases() {
    let registry = JobRegistry::in_memory();
    let permit = registry.try_acquire("api", "main", JobKind::Deploy).unwrap();
    let id = permit.job_id().to_string();
    permit.update(|job| job.complete(Utc::now()));

    let job = registry.finish(permit).await.unwrap();
    assert_eq!(job.id, id);
    assert!(!registry.is_active("api"));
    assert_eq!(registry.find(&id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_history_survives_reopen_and_prune() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.jsonl");

    let registry = JobRegistry::open(File::new(&path)).await.unwrap();
    for age in [30, 20, 10] {
        registry.record(&finished("api", age)).await.unwrap();
    }
    registry.record(&finished("web", 5)).await.unwrap();

    let reopened = JobRegistry::open(File::new(&path)).await.unwrap();
    assert_eq!(reopened.history("api", 10).await.len(), 3);

    assert_eq!(reopened.prune(1).await.unwrap(), 2);
    let pruned = JobRegistry::open(File::new(&path)).await.unwrap();
    let api = pruned.history("api", 10).await;
    assert_eq!(api.len(), 1);
    assert!(api[0].started_at > Utc::now() - ChronoDuration::minutes(11));
    assert_eq!(pruned.history("web", 10).await.len(), 1);
}
