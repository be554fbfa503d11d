//! Server state

use std::time::Duration;

use crate::ops::ControlPlane;

/// Server state shared across handlers
pub struct ServerState {
    pub control: ControlPlane,

    /// Interval of SSE keep-alive comments
    pub keep_alive: Duration,
}

impl ServerState {
    pub fn new(control: ControlPlane, keep_alive: Duration) -> Self {
        Self {
            control,
            keep_alive,
        }
    }
}
