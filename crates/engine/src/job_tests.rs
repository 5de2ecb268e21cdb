use super::*;
use crate::testing::TestJob;

#[test]
fn poll_interval_grows_and_caps() {
    let mut poll = PollInterval::new();
    let first = poll.increment();
    assert_eq!(first, Duration::from_millis(60));
    let mut last = first;
    for _ in 0..100 {
        let next = poll.increment();
        assert!(next >= last);
        last = next;
    }
    assert_eq!(last, Duration::from_secs(10));
}

#[test]
fn poll_interval_resets_to_default() {
    let mut poll = PollInterval::new();
    poll.increment();
    poll.increment();
    poll.reset();
    assert_eq!(poll.increment(), Duration::from_millis(60));
}

#[tokio::test]
async fn job_carries_kind_and_payload_into_record() {
    let job = Job::new(
        TestJob::builder()
            .kind("upload")
            .payload(serde_json::json!({"file": "a.txt"}))
            .build(),
    );
    assert_eq!(job.record.kind.as_deref(), Some("upload"));
    assert_eq!(job.record.payload, serde_json::json!({"file": "a.txt"}));
    assert_eq!(job.record.state, JobState::New);
}

#[tokio::test]
async fn pre_submission_self_edge_is_rejected() {
    let mut job = Job::new(TestJob::succeeding("x").build());
    let id = job.id().clone();
    assert!(job.depends_on(&id, DependencyFailureStrategy::CascadeFailure).is_err());
    assert!(job.record.depends.is_empty());
}

#[tokio::test]
async fn entry_message_falls_back_to_policy_gating() {
    let gate = std::sync::Arc::new(drover_core::StaticGate::new(false, "offline"));
    let mut policy =
        RunPolicy::builder().gating_condition_arc(gate.clone()).build();
    policy.reset(1_000);

    let record = JobRecord::new(JobId::new("job-a"));
    let handler: Arc<dyn crate::handler::JobHandler> =
        Arc::new(TestJob::succeeding("x").build());
    let mut entry = Entry::new(record, handler, 1_000);
    assert_eq!(entry.message(), None);
    entry.policy = Some(policy);
    assert_eq!(entry.message(), Some("offline".to_string()));

    gate.set_open(true);
    assert_eq!(entry.message(), None);

    entry.record.state_message = Some("boom".to_string());
    assert_eq!(entry.message(), Some("boom".to_string()));
}

#[tokio::test]
async fn snapshot_reflects_entry_state() {
    let mut record = JobRecord::new(JobId::new("job-a"));
    record.state = JobState::Wait;
    let handler: Arc<dyn crate::handler::JobHandler> =
        Arc::new(TestJob::succeeding("x").build());
    let mut entry = Entry::new(record, handler, 1_000);
    entry.assimilated_by = Some(JobId::new("job-b"));

    let snapshot = entry.snapshot();
    assert_eq!(snapshot.state(), JobState::Wait);
    assert_eq!(snapshot.assimilated_by, Some(JobId::new("job-b")));
    assert_eq!(snapshot.attempts_remaining, None);
}
