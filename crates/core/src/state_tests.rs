use super::*;
use yare::parameterized;

#[parameterized(
    succeeded = { JobState::Succeeded },
    faulted = { JobState::Faulted },
    canceled = { JobState::Canceled },
    assimilated = { JobState::Assimilated },
)]
fn terminal_states(state: JobState) {
    assert!(state.is_terminal());
    assert!(!state.is_in_work_loop());
}

#[parameterized(
    new = { JobState::New },
    wait = { JobState::Wait },
    ready = { JobState::Ready },
    busy = { JobState::Busy },
)]
fn non_terminal_states(state: JobState) {
    assert!(!state.is_terminal());
}

#[test]
fn failed_is_faulted_or_canceled() {
    assert!(JobState::Faulted.is_failed());
    assert!(JobState::Canceled.is_failed());
    assert!(!JobState::Succeeded.is_failed());
    assert!(!JobState::Assimilated.is_failed());
    assert!(!JobState::Busy.is_failed());
}

#[test]
fn work_loop_states() {
    assert!(JobState::Wait.is_in_work_loop());
    assert!(JobState::Ready.is_in_work_loop());
    assert!(JobState::Busy.is_in_work_loop());
    assert!(!JobState::New.is_in_work_loop());
}

#[test]
fn pre_execute_states() {
    assert!(JobState::New.is_pre_execute());
    assert!(JobState::Wait.is_pre_execute());
    assert!(JobState::Ready.is_pre_execute());
    assert!(!JobState::Busy.is_pre_execute());
    assert!(!JobState::Succeeded.is_pre_execute());
}

#[test]
fn satisfied_states() {
    assert!(JobState::Succeeded.is_satisfied());
    assert!(JobState::Assimilated.is_satisfied());
    assert!(!JobState::Faulted.is_satisfied());
    assert!(!JobState::Busy.is_satisfied());
}

#[test]
fn serde_round_trip() {
    let json = serde_json::to_string(&JobState::Assimilated).unwrap();
    assert_eq!(json, "\"assimilated\"");
    let back: JobState = serde_json::from_str(&json).unwrap();
    assert_eq!(back, JobState::Assimilated);
}

#[test]
fn display_matches_serde() {
    assert_eq!(JobState::Wait.to_string(), "wait");
    assert_eq!(JobState::Succeeded.to_string(), "succeeded");
}
