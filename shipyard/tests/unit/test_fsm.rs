//! FSM unit tests

use shipyard::deploy::fsm::{JobEvent, JobFsm, JobState};
use shipyard::models::job::Step;

#[test]
fn test_fsm_initial_state() {
    let fsm = JobFsm::new();
    assert_eq!(fsm.state(), JobState::Pending);
    assert_eq!(fsm.step(), Step::Connect);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = JobFsm::new();

    fsm.process(JobEvent::Begin).unwrap();
    assert_eq!(fsm.state(), JobState::Connecting);

    let expected = [
        (JobState::Pulling, Step::Pull),
        (JobState::Building, Step::Build),
        (JobState::HealthChecking, Step::Health),
    ];
    for (state, step) in expected {
        fsm.process(JobEvent::StepSucceeded).unwrap();
        assert_eq!(fsm.state(), state);
        assert_eq!(fsm.step(), step);
    }

    fsm.process(JobEvent::StepSucceeded).unwrap();
    assert_eq!(fsm.state(), JobState::Completed);
    assert_eq!(fsm.step(), Step::Health);
}

#[test]
fn test_fsm_failure_keeps_failed_step() {
    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Begin).unwrap();
    fsm.process(JobEvent::StepSucceeded).unwrap();

    fsm.process(JobEvent::StepFailed("network unreachable".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), JobState::Failed);
    assert_eq!(fsm.step(), Step::Pull);
    assert_eq!(fsm.error(), Some("network unreachable"));
}

#[test]
fn test_fsm_terminal_states_reject_events() {
    let mut fsm = JobFsm::new();
    fsm.process(JobEvent::Begin).unwrap();
    fsm.process(JobEvent::StepFailed("boom".to_string())).unwrap();

    assert!(fsm.process(JobEvent::StepSucceeded).is_err());
    assert!(fsm.process(JobEvent::Begin).is_err());
    assert!(fsm.process(JobEvent::StepFailed("again".to_string())).is_err());
    assert_eq!(fsm.error(), Some("boom"));
}

#[test]
fn test_fsm_cannot_succeed_before_begin() {
    let mut fsm = JobFsm::new();
    assert!(fsm.process(JobEvent::StepSucceeded).is_err());
    assert_eq!(fsm.state(), JobState::Pending);
}
