//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::bus::DEFAULT_SUBSCRIBER_BUFFER;
use crate::logs::LogLevel;
use crate::utils::BackoffOptions;

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to daily files in the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment timings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Event stream configuration
    #[serde(default)]
    pub events: EventSettings,

    /// Background container status refresh
    #[serde(default)]
    pub status_poller: StatusPollerSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            events: EventSettings::default(),
            status_poller: StatusPollerSettings::default(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allow cross-origin requests from any origin
    #[serde(default)]
    pub permissive_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            permissive_cors: false,
        }
    }
}

/// Timing and policy knobs of the deployment engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Watchdog for pull and build
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    #[serde(default = "default_health_initial_delay")]
    pub health_initial_delay_secs: u64,

    /// Overall budget of the health step, initial delay included
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,

    #[serde(default = "default_health_backoff_base")]
    pub health_backoff_base_ms: u64,

    #[serde(default = "default_health_backoff_max")]
    pub health_backoff_max_ms: u64,

    /// Timeout of a single health probe
    #[serde(default = "default_health_probe_timeout")]
    pub health_probe_timeout_secs: u64,

    /// Record the deployed commit before pulling so rollback can return to it
    #[serde(default = "default_true")]
    pub backup_before_pull: bool,

    /// Messages kept in a job's log tail
    #[serde(default = "default_max_job_log_lines")]
    pub max_job_log_lines: usize,
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_step_timeout() -> u64 {
    600
}

fn default_health_initial_delay() -> u64 {
    5
}

fn default_health_timeout() -> u64 {
    120
}

fn default_health_backoff_base() -> u64 {
    1000
}

fn default_health_backoff_max() -> u64 {
    15000
}

fn default_health_probe_timeout() -> u64 {
    10
}

fn default_max_job_log_lines() -> usize {
    500
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            step_timeout_secs: default_step_timeout(),
            health_initial_delay_secs: default_health_initial_delay(),
            health_timeout_secs: default_health_timeout(),
            health_backoff_base_ms: default_health_backoff_base(),
            health_backoff_max_ms: default_health_backoff_max(),
            health_probe_timeout_secs: default_health_probe_timeout(),
            backup_before_pull: true,
            max_job_log_lines: default_max_job_log_lines(),
        }
    }
}

impl EngineSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn health_initial_delay(&self) -> Duration {
        Duration::from_secs(self.health_initial_delay_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }

    pub fn health_backoff(&self) -> BackoffOptions {
        BackoffOptions {
            base_delay: Duration::from_millis(self.health_backoff_base_ms),
            max_delay: Duration::from_millis(
                self.health_backoff_max_ms.max(self.health_backoff_base_ms),
            ),
            multiplier: 2.0,
        }
    }
}

/// Event stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Events buffered per subscriber before it is disconnected
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// SSE keep-alive interval
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_subscriber_buffer() -> usize {
    DEFAULT_SUBSCRIBER_BUFFER
}

fn default_keep_alive() -> u64 {
    15
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

/// Status poller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPollerSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Polling interval in seconds
    #[serde(default = "default_polling_interval")]
    pub interval_secs: u64,
}

fn default_polling_interval() -> u64 {
    60
}

impl Default for StatusPollerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_polling_interval(),
        }
    }
}
