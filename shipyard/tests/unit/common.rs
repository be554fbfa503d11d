//! Shared fixtures

use std::sync::Arc;
use std::time::Duration;

use shipyard::events::{EventBus, Subscription};
use shipyard::http::HttpClient;
use shipyard::jobs::JobRegistry;
use shipyard::models::event::ProgressEvent;
use shipyard::models::project::{Credential, ProjectConfig, ServerConfig};
use shipyard::ops::ControlPlane;
use shipyard::registry::ProjectRegistry;
use shipyard::remote::fake::FakeExecutor;
use shipyard::storage::settings::EngineSettings;

pub fn server() -> ServerConfig {
    ServerConfig {
        host: "10.0.0.5".to_string(),
        port: 22,
        user: "deploy".to_string(),
        credential: Credential::Agent,
    }
}

pub fn project_config(path: &str) -> ProjectConfig {
    ProjectConfig {
        server: server(),
        path: path.to_string(),
        branch: "main".to_string(),
        compose_file: "docker-compose.yml".to_string(),
        health_check: None,
        sync_files: Vec::new(),
    }
}

/// Timings small enough for tests
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        connect_timeout_secs: 2,
        step_timeout_secs: 5,
        health_initial_delay_secs: 0,
        health_timeout_secs: 1,
        health_backoff_base_ms: 10,
        health_backoff_max_ms: 50,
        health_probe_timeout_secs: 1,
        ..EngineSettings::default()
    }
}

pub struct Harness {
    pub control: ControlPlane,
    pub fake: FakeExecutor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(Arc::new(ProjectRegistry::in_memory()), JobRegistry::in_memory())
    }

    pub fn with_stores(projects: Arc<ProjectRegistry>, jobs: JobRegistry) -> Self {
        let fake = FakeExecutor::new();
        let http = HttpClient::new(Duration::from_secs(1)).unwrap();
        let control = ControlPlane::new(
            projects,
            jobs,
            EventBus::default(),
            Arc::new(fake.clone()),
            fast_settings(),
            http,
        );
        Self { control, fake }
    }

    /// Harness with `api` registered at `/srv/api`
    pub async fn with_api() -> Self {
        let harness = Self::new();
        harness
            .control
            .register("api", project_config("/srv/api"))
            .await
            .unwrap();
        harness
    }
}

/// Everything already buffered in a subscription
pub fn drain(subscription: &mut Subscription) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}
