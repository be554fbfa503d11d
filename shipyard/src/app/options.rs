//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::{EngineSettings, Settings};
use crate::workers::status_poller;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployment engine timings
    pub engine: EngineSettings,

    /// Events buffered per SSE subscriber
    pub subscriber_buffer: usize,

    /// Enable the status poller worker
    pub enable_status_poller: bool,

    /// Status poller worker options
    pub status_poller: status_poller::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), &Settings::default())
    }
}

impl AppOptions {
    /// Build the options from a loaded settings file
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
                permissive_cors: settings.server.permissive_cors,
                keep_alive: Duration::from_secs(settings.events.keep_alive_secs.max(1)),
            },
            engine: settings.engine.clone(),
            subscriber_buffer: settings.events.subscriber_buffer.max(1),
            enable_status_poller: settings.status_poller.enabled,
            status_poller: status_poller::Options {
                interval: Duration::from_secs(settings.status_poller.interval_secs.max(1)),
                ..Default::default()
            },
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allow any origin
    pub permissive_cors: bool,

    /// SSE keep-alive interval
    pub keep_alive: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            permissive_cors: false,
            keep_alive: Duration::from_secs(15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_settings() {
        let mut settings = Settings::default();
        settings.server.port = 9100;
        settings.status_poller.enabled = true;
        settings.status_poller.interval_secs = 0;

        let options = AppOptions::from_settings(StorageLayout::new("/tmp/shipyard"), &settings);
        assert_eq!(options.server.port, 9100);
        assert!(options.enable_status_poller);
        assert_eq!(options.status_poller.interval, Duration::from_secs(1));
        assert_eq!(options.engine, EngineSettings::default());
    }
}
