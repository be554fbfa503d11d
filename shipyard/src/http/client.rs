//! HTTP client for service health probes made from the daemon

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ShipyardError;

/// Outcome of one HTTP probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHealth {
    pub url: String,
    pub healthy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    pub elapsed_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probes `http(s)://` health endpoints
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(timeout: Duration) -> Result<Self, ShipyardError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shipyard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// GET `url`; 2xx and 3xx count as healthy
    pub async fn probe(&self, url: &url::Url) -> HttpHealth {
        debug!("GET {}", url);
        let started = Instant::now();
        let result = self.client.get(url.clone()).send().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status();
                HttpHealth {
                    url: url.to_string(),
                    healthy: status.is_success() || status.is_redirection(),
                    status_code: Some(status.as_u16()),
                    elapsed_ms,
                    error: None,
                }
            }
            Err(e) => HttpHealth {
                url: url.to_string(),
                healthy: false,
                status_code: None,
                elapsed_ms,
                error: Some(e.to_string()),
            },
        }
    }
}
