//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::app::options::AppOptions;
use crate::errors::ShipyardError;
use crate::events::EventBus;
use crate::http::HttpClient;
use crate::jobs::JobRegistry;
use crate::ops::ControlPlane;
use crate::registry::ProjectRegistry;
use crate::remote::RemoteExecutor;

/// How often shutdown checks for jobs still running
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Main application state
pub struct AppState {
    pub control: ControlPlane,
}

impl AppState {
    /// Open the stores under the data directory and wire the control plane
    pub async fn init(
        options: &AppOptions,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<Self, ShipyardError> {
        info!("Initializing application state...");

        let layout = &options.layout;
        layout.setup().await?;

        let projects = Arc::new(ProjectRegistry::open(layout.projects_file()).await?);
        let jobs = JobRegistry::open(layout.history_file()).await?;
        let bus = EventBus::new(options.subscriber_buffer);
        let http = HttpClient::new(options.engine.health_probe_timeout())?;

        info!(
            "Loaded {} projects from {}",
            projects.list().await.len(),
            layout.base_dir.display()
        );

        let control = ControlPlane::new(projects, jobs, bus, executor, options.engine.clone(), http);
        Ok(Self { control })
    }

    /// Wait for running jobs to reach a terminal state. Jobs are never
    /// interrupted; the caller bounds how long this may take.
    pub async fn shutdown(&self) -> Result<(), ShipyardError> {
        info!("Shutting down application state...");

        loop {
            let active = self.control.active();
            if active.is_empty() {
                return Ok(());
            }
            info!("Waiting for {} running jobs to finish...", active.len());
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}
