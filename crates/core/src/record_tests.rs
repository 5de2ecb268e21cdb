use super::*;
use yare::parameterized;

#[test]
fn new_record_defaults() {
    let record = JobRecord::new(JobId::new("job-a"));
    assert_eq!(record.state, JobState::New);
    assert!(record.state_message.is_none());
    assert!(record.depends.is_empty());
    assert!(record.result.is_none());
}

#[test]
fn add_edge_rejects_self() {
    let mut record = JobRecord::new(JobId::new("job-a"));
    let err = record.add_edge(JobId::new("job-a"), DependencyFailureStrategy::CascadeFailure);
    assert!(matches!(err, Err(DependError::SelfDependency(_))));
}

#[parameterized(
    wait = { JobState::Wait },
    ready = { JobState::Ready },
    busy = { JobState::Busy },
)]
fn reload_normalizes_work_loop_states_to_wait(state: JobState) {
    let mut record = JobRecord::new(JobId::new("job-a"));
    record.state = state;
    assert_eq!(record.normalized_for_reload().state, JobState::Wait);
}

#[parameterized(
    new = { JobState::New },
    succeeded = { JobState::Succeeded },
    faulted = { JobState::Faulted },
    canceled = { JobState::Canceled },
    assimilated = { JobState::Assimilated },
)]
fn reload_keeps_states_outside_work_loop(state: JobState) {
    let mut record = JobRecord::new(JobId::new("job-a"));
    record.state = state;
    assert_eq!(record.normalized_for_reload().state, state);
}

#[test]
fn serde_round_trip() {
    let mut record = JobRecord::new(JobId::new("job-a"));
    record.state = JobState::Succeeded;
    record.kind = Some("upload".into());
    record.payload = serde_json::json!({"file": "a.txt"});
    record.result = Some(serde_json::json!("done"));
    record.time_job_started_ms = 12345;
    record.add_edge(JobId::new("job-b"), DependencyFailureStrategy::IgnoreFailure).unwrap();

    let json = serde_json::to_string(&record).unwrap();
    let back: JobRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
}

#[test]
fn satisfied_follows_state() {
    let mut record = JobRecord::new(JobId::new("job-a"));
    assert!(!record.is_satisfied());
    record.state = JobState::Succeeded;
    assert!(record.is_satisfied());
    record.state = JobState::Assimilated;
    assert!(record.is_satisfied());
}
