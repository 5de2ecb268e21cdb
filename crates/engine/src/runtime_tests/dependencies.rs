use super::{manager, WAIT};
use crate::error::EngineError;
use crate::job::Job;
use crate::testing::TestJob;
use drover_core::{DependError, DependencyFailureStrategy, JobState, RunPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn slow_job() -> TestJob {
    TestJob::builder()
        .work(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(JobState::Succeeded)
        })
        .result("slow")
        .build()
}

fn failing_job() -> TestJob {
    TestJob::builder().work(|| async { anyhow::bail!("upstream broke") }).build()
}

#[tokio::test(start_paused = true)]
async fn dependent_waits_for_depended_success() {
    let manager = manager();
    let upstream = manager.submit(Job::new(slow_job())).await.unwrap();

    let order = Arc::new(AtomicU32::new(0));
    let work_order = order.clone();
    let mut downstream_job = Job::new(
        TestJob::builder()
            .work(move || {
                let order = work_order.clone();
                async move {
                    order.store(1, Ordering::SeqCst);
                    Ok(JobState::Succeeded)
                }
            })
            .result("after")
            .build(),
    );
    downstream_job
        .depends_on(upstream.job_id(), DependencyFailureStrategy::CascadeFailure)
        .unwrap();
    let downstream = manager.submit(downstream_job).await.unwrap();

    // Downstream cannot run while upstream is busy.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(downstream.state(), JobState::Wait);
    assert_eq!(order.load(Ordering::SeqCst), 0);

    assert_eq!(upstream.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(downstream.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cascade_failure_propagates_with_upstream_identity() {
    let manager = manager();
    let upstream = manager.submit(Job::new(failing_job())).await.unwrap();

    let mut downstream_job = Job::new(TestJob::succeeding("never").build());
    downstream_job
        .depends_on(upstream.job_id(), DependencyFailureStrategy::CascadeFailure)
        .unwrap();
    let downstream = manager.submit(downstream_job).await.unwrap();

    assert_eq!(upstream.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(downstream.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    let message = downstream.state_message().unwrap_or_default();
    assert!(
        message.contains(upstream.job_id().as_str()),
        "message should name the upstream job: {message}"
    );
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cascade_failure_is_transitive() {
    let manager = manager();
    let a = manager.submit(Job::new(failing_job())).await.unwrap();

    let mut b_job = Job::new(TestJob::succeeding("b").build());
    b_job.depends_on(a.job_id(), DependencyFailureStrategy::CascadeFailure).unwrap();
    let b = manager.submit(b_job).await.unwrap();

    let mut c_job = Job::new(TestJob::succeeding("c").build());
    c_job.depends_on(b.job_id(), DependencyFailureStrategy::CascadeFailure).unwrap();
    let c = manager.submit(c_job).await.unwrap();

    assert_eq!(a.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(b.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(c.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ignore_failure_lets_dependent_run() {
    let manager = manager();
    let upstream = manager.submit(Job::new(failing_job())).await.unwrap();

    let mut downstream_job = Job::new(TestJob::succeeding("survivor").build());
    downstream_job
        .depends_on(upstream.job_id(), DependencyFailureStrategy::IgnoreFailure)
        .unwrap();
    let downstream = manager.submit(downstream_job).await.unwrap();

    assert_eq!(upstream.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(downstream.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(downstream.result(), Some(serde_json::json!("survivor")));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn on_dependency_failed_can_override_cascade() {
    let manager = manager();
    let upstream = manager.submit(Job::new(failing_job())).await.unwrap();

    let mut downstream_job = Job::new(
        TestJob::succeeding("tolerant")
            .on_dependency_failed(|_| JobState::Canceled)
            .build(),
    );
    downstream_job
        .depends_on(upstream.job_id(), DependencyFailureStrategy::CascadeFailure)
        .unwrap();
    let downstream = manager.submit(downstream_job).await.unwrap();

    assert_eq!(downstream.wait_for_terminal_state(WAIT).await, JobState::Canceled);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pre_submission_edge_to_unknown_target_fails_submit() {
    let manager = manager();
    let mut job = Job::new(TestJob::succeeding("x").build());
    let ghost = drover_core::JobId::new("job-ghost");
    job.depends_on(&ghost, DependencyFailureStrategy::CascadeFailure).unwrap();

    let err = manager.submit(job).await.unwrap_err();
    assert!(matches!(err, EngineError::Depend(DependError::NotActive(id)) if id == ghost));
    assert!(manager.jobs().await.is_empty());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn add_dependency_requires_registered_target_then_succeeds() {
    let manager = manager();
    let waiting = manager
        .submit(Job::new(
            TestJob::succeeding("w")
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
                .build(),
        ))
        .await
        .unwrap();

    let ghost = drover_core::JobId::new("job-ghost");
    let err = manager
        .add_dependency(waiting.job_id(), &ghost, DependencyFailureStrategy::CascadeFailure)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Depend(DependError::NotActive(_))));

    let target = manager.submit(Job::new(slow_job())).await.unwrap();
    manager
        .add_dependency(waiting.job_id(), target.job_id(), DependencyFailureStrategy::CascadeFailure)
        .await
        .unwrap();

    let snapshot = manager.get_job(waiting.job_id()).await.unwrap();
    assert!(snapshot.record.depends.contains(target.job_id()));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cycle_is_rejected_and_edges_unchanged() {
    let manager = manager();
    let a = manager
        .submit(Job::new(
            TestJob::succeeding("a")
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
                .build(),
        ))
        .await
        .unwrap();

    let mut b_job = Job::new(
        TestJob::succeeding("b")
            .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
            .build(),
    );
    b_job.depends_on(a.job_id(), DependencyFailureStrategy::CascadeFailure).unwrap();
    let b = manager.submit(b_job).await.unwrap();
    // Let both jobs get enqueued so the edge b -> a is live.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let err = manager
        .add_dependency(a.job_id(), b.job_id(), DependencyFailureStrategy::CascadeFailure)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Depend(DependError::Cycle { .. })));

    let snapshot = manager.get_job(a.job_id()).await.unwrap();
    assert!(snapshot.record.depends.is_empty());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scope_can_add_edges_from_on_added() {
    let manager = manager();
    let upstream = manager.submit(Job::new(slow_job())).await.unwrap();

    let upstream_id = upstream.job_id().clone();
    let downstream = manager
        .submit(Job::new(
            TestJob::succeeding("scoped")
                .on_added(move |scope| {
                    scope.add_dependency(&upstream_id, DependencyFailureStrategy::CascadeFailure)?;
                    Ok(JobState::Wait)
                })
                .build(),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let snapshot = manager.get_job(downstream.job_id()).await.unwrap();
    assert!(snapshot.record.depends.contains(upstream.job_id()));
    assert_eq!(downstream.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dependents_are_serviced_on_depended_completion() {
    let manager = manager();
    let upstream = manager.submit(Job::new(slow_job())).await.unwrap();

    let mut downstream_job = Job::new(TestJob::succeeding("chained").build());
    downstream_job
        .depends_on(upstream.job_id(), DependencyFailureStrategy::IgnoreFailure)
        .unwrap();
    let downstream = manager.submit(downstream_job).await.unwrap();

    assert_eq!(upstream.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    // The dependent is woken by the completion, not by a poll timer; it
    // finishes promptly after.
    assert_eq!(downstream.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}
