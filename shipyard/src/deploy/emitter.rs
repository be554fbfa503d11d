//! Progress reporting for a running job

use tracing::{debug, info, warn};

use crate::errors::ShipyardError;
use crate::events::EventBus;
use crate::jobs::JobPermit;
use crate::models::event::{ProgressEvent, StepStatus};
use crate::models::job::Step;

/// Publishes a job's events and mirrors them into the job's log tail
pub struct StepEmitter<'a> {
    bus: &'a EventBus,
    permit: &'a JobPermit,
    max_log_lines: usize,
}

impl<'a> StepEmitter<'a> {
    pub fn new(bus: &'a EventBus, permit: &'a JobPermit, max_log_lines: usize) -> Self {
        Self {
            bus,
            permit,
            max_log_lines,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        let line = event.to_wire_line();
        let max = self.max_log_lines;
        self.permit.update(|job| job.push_log(line, max));
        self.bus.publish(&event);
    }

    fn progress(&self, step: Step, status: StepStatus, message: String) -> ProgressEvent {
        ProgressEvent::progress(
            self.permit.job_id(),
            self.permit.project(),
            step,
            status,
            message,
        )
    }

    pub fn started(&self, step: Step, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {} started: {}", self.permit.project(), step, message);
        self.permit.update(|job| job.current_step = step);
        self.emit(self.progress(step, StepStatus::Started, message));
    }

    pub fn success(&self, step: Step, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {} succeeded: {}", self.permit.project(), step, message);
        self.emit(self.progress(step, StepStatus::Success, message));
    }

    pub fn failed(&self, step: Step, error: &ShipyardError) {
        warn!("[{}] {} failed: {}", self.permit.project(), step, error);
        let event = self
            .progress(step, StepStatus::Failed, error.to_string())
            .with_error_kind(error.kind());
        self.emit(event);
    }

    /// Forward one line of remote output or an informational note
    pub fn log(&self, step: Step, line: &str) {
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        debug!("[{}] {}: {}", self.permit.project(), step, line);
        self.emit(ProgressEvent::log(
            self.permit.job_id(),
            self.permit.project(),
            step,
            line,
        ));
    }
}
