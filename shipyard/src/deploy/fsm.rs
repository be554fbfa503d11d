//! Finite State Machine for a deployment attempt

use serde::{Deserialize, Serialize};

use crate::models::job::Step;

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Permit held, nothing run yet
    Pending,

    Connecting,
    Pulling,
    Building,
    HealthChecking,

    /// All steps succeeded
    Completed,

    /// A step failed
    Failed,
}

impl JobState {
    fn for_step(step: Step) -> Self {
        match step {
            Step::Connect => JobState::Connecting,
            Step::Pull => JobState::Pulling,
            Step::Build => JobState::Building,
            Step::Health => JobState::HealthChecking,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Start the first step
    Begin,

    /// The running step finished successfully
    StepSucceeded,

    /// The running step failed
    StepFailed(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct JobFsm {
    state: JobState,
    step: Step,
    error: Option<String>,
}

impl JobFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: JobState::Pending,
            step: Step::Connect,
            error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Step running now, or the last one that ran once terminal
    pub fn step(&self) -> Step {
        self.step
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<(), String> {
        let new_state = match (self.state, &event) {
            (JobState::Pending, JobEvent::Begin) => JobState::for_step(Step::Connect),

            (JobState::Pending, JobEvent::StepFailed(err)) => {
                self.error = Some(err.clone());
                JobState::Failed
            }

            (state, JobEvent::StepSucceeded) if !state.is_terminal() && state != JobState::Pending => {
                match self.step.next() {
                    Some(next) => {
                        self.step = next;
                        JobState::for_step(next)
                    }
                    None => JobState::Completed,
                }
            }

            (state, JobEvent::StepFailed(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                JobState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for JobFsm {
    fn default() -> Self {
        Self::new()
    }
}
