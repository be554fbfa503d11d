//! Periodic refresh of every project's observed container status

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ops::ControlPlane;

/// Status poller options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Initial delay before first poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Refresh the status of each registered project once.
///
/// Projects with an active job are skipped; the job owns the host until it
/// finishes. Returns how many projects were refreshed.
pub async fn poll_once(control: &ControlPlane) -> usize {
    let mut refreshed = 0;
    for project in control.list().await {
        if control.jobs().is_active(&project.name) {
            debug!("skipping status of {}: job in progress", project.name);
            continue;
        }

        match control.project_status(&project.name).await {
            Ok(status) if status.reachable => {
                debug!("{} is {}", project.name, status.container_status);
                refreshed += 1;
            }
            Ok(status) => {
                warn!(
                    "{} unreachable: {}",
                    project.name,
                    status.error.unwrap_or_default()
                );
            }
            Err(e) => warn!("status of {} failed: {}", project.name, e),
        }
    }
    refreshed
}

/// Run the status poller worker
pub async fn run<S, F>(
    options: &Options,
    control: &ControlPlane,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Status poller starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Status poller shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        let refreshed = poll_once(control).await;
        debug!("refreshed status of {} projects", refreshed);

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Status poller shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}
