//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::ShipyardError;
use crate::remote::RemoteExecutor;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::status_poller;

/// Run the daemon until the shutdown signal resolves
pub async fn run(
    options: AppOptions,
    executor: Arc<dyn RemoteExecutor>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ShipyardError> {
    info!("Initializing Shipyard...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, executor, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start Shipyard: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    executor: Arc<dyn RemoteExecutor>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), ShipyardError> {
    let app_state = Arc::new(AppState::init(options, executor).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_server(options, app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;

    if options.enable_status_poller {
        init_status_poller(
            options.status_poller.clone(),
            app_state,
            shutdown_manager,
            shutdown_tx.subscribe(),
        )?;
    }

    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ShipyardError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.control.clone(), options.server.keep_alive);

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

fn init_status_poller(
    options: status_poller::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ShipyardError> {
    info!("Initializing status poller...");

    let handle = tokio::spawn(async move {
        status_poller::run(
            &options,
            &app_state.control,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_status_poller_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), ShipyardError>>>,
    status_poller_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            status_poller_handle: None,
        }
    }

    fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), ShipyardError> {
        if self.app_state.is_some() {
            return Err(ShipyardError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ShipyardError>>,
    ) -> Result<(), ShipyardError> {
        if self.server_handle.is_some() {
            return Err(ShipyardError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    fn with_status_poller_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ShipyardError> {
        if self.status_poller_handle.is_some() {
            return Err(ShipyardError::ShutdownError(
                "status_poller_handle already set".to_string(),
            ));
        }
        self.status_poller_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ShipyardError> {
        let _ = self.shutdown_tx.send(());

        let limit = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(limit, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => Err(ShipyardError::ShutdownError(format!(
                "shutdown did not complete within {:?}",
                limit
            ))),
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ShipyardError> {
        info!("Shutting down Shipyard...");

        // 1. Status poller
        if let Some(handle) = self.status_poller_handle.take() {
            handle.await.map_err(|e| ShipyardError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server; open event streams would keep it alive
        if let Some(app_state) = &self.app_state {
            app_state.control.bus().disconnect_all();
        }
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| ShipyardError::ShutdownError(e.to_string()))??;
        }

        // 3. Running jobs
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
