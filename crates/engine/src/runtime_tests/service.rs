use super::{builder, manager, WAIT};
use crate::job::Job;
use crate::testing::TestJob;
use drover_core::{JobState, RunPolicy, StaticGate};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn successful_job_reports_result() {
    let manager = manager();
    let observer = manager.submit(Job::new(TestJob::succeeding("X").build())).await.unwrap();

    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(observer.result(), Some(serde_json::json!("X")));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn wait_until_added_fires_on_enqueue() {
    let manager = manager();
    let observer = manager
        .submit(Job::new(
            TestJob::builder()
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
                .build(),
        ))
        .await
        .unwrap();

    let state = observer.wait_until_added(WAIT).await;
    assert_ne!(state, JobState::New);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_attempts_retry_until_success() {
    let attempts = Arc::new(AtomicU32::new(0));
    let work_attempts = attempts.clone();
    let handler = TestJob::builder()
        .policy(
            RunPolicy::builder()
                .max_attempts(5)
                .retry_delay(Duration::from_millis(100))
                .build(),
        )
        .work(move || {
            let attempts = work_attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(JobState::Ready)
                } else {
                    Ok(JobState::Succeeded)
                }
            }
        })
        .result("eventually")
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fault_with_message() {
    let handler = TestJob::builder()
        .policy(
            RunPolicy::builder().max_attempts(2).retry_delay(Duration::from_millis(50)).build(),
        )
        .work(|| async { Ok(JobState::Ready) })
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(observer.state_message().as_deref(), Some("no more retries"));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn work_error_faults_without_retry() {
    let attempts = Arc::new(AtomicU32::new(0));
    let work_attempts = attempts.clone();
    let handler = TestJob::builder()
        .work(move || {
            let attempts = work_attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("disk on fire")
            }
        })
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(observer.state_message().as_deref(), Some("disk on fire"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn succeeded_without_result_faults() {
    let handler = TestJob::builder().no_result().work(|| async { Ok(JobState::Succeeded) }).build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(observer.state_message().as_deref(), Some("produced no result"));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn on_added_returning_new_faults() {
    let handler = TestJob::builder().on_added(|_| Ok(JobState::New)).build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn on_added_terminal_short_circuits() {
    let worked = Arc::new(AtomicU32::new(0));
    let work_count = worked.clone();
    let handler = TestJob::builder()
        .on_added(|_| Ok(JobState::Canceled))
        .work(move || {
            let worked = work_count.clone();
            async move {
                worked.fetch_add(1, Ordering::SeqCst);
                Ok(JobState::Succeeded)
            }
        })
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Canceled);
    assert_eq!(worked.load(Ordering::SeqCst), 0);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn gating_condition_blocks_until_open() {
    let gate = Arc::new(StaticGate::new(false, "waiting for network"));
    let handler = TestJob::succeeding("online")
        .policy(RunPolicy::builder().gating_condition_arc(gate.clone()).build())
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();

    // Gate closed: the job parks in Wait with the gate's message.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(observer.state(), JobState::Wait);
    assert_eq!(observer.state_message().as_deref(), Some("waiting for network"));

    gate.set_open(true);
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn job_timeout_faults_waiting_job() {
    let gate = Arc::new(StaticGate::new(false, "never"));
    let handler = TestJob::builder()
        .policy(
            RunPolicy::builder()
                .job_timeout(Duration::from_secs(5))
                .gating_condition_arc(gate)
                .build(),
        )
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(observer.state_message().as_deref(), Some("timed out"));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn attempt_timeout_recycles_hung_worker() {
    let attempts = Arc::new(AtomicU32::new(0));
    let work_attempts = attempts.clone();
    let handler = TestJob::builder()
        .policy(
            RunPolicy::builder()
                .max_attempts(3)
                .attempt_timeout(Duration::from_millis(200))
                .retry_delay(Duration::from_millis(50))
                .build(),
        )
        .work(move || {
            let attempts = work_attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    // Hang well past the attempt timeout.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                Ok(JobState::Succeeded)
            }
        })
        .result("second wind")
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn busy_continuation_completes_via_request_state() {
    let handler = TestJob::builder()
        .work(|| async { Ok(JobState::Busy) })
        .result("async done")
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();

    // Let the job settle into its asynchronous Busy phase.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(observer.state(), JobState::Busy);

    let state = observer.request_state(JobState::Succeeded).await.unwrap();
    assert_eq!(state, JobState::Succeeded);
    assert_eq!(observer.result(), Some(serde_json::json!("async done")));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_is_idempotent_and_rolls_back_once() {
    let rollbacks = Arc::new(AtomicU32::new(0));
    let rollback_count = rollbacks.clone();
    let handler = TestJob::builder()
        .work(|| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(JobState::Succeeded)
        })
        .rollback(move || {
            rollback_count.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(observer.state(), JobState::Busy);

    observer.cancel().await;
    observer.cancel().await;
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Canceled);
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);

    // After cancellation, non-canceled requests are rejected.
    assert!(observer.request_state(JobState::Ready).await.is_err());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_after_success_is_a_no_op() {
    let manager = manager();
    let observer = manager.submit(Job::new(TestJob::succeeding("X").build())).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);

    observer.cancel().await;
    assert_eq!(observer.state(), JobState::Succeeded);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscribe_sees_terminal_update() {
    let (update_tx, mut update_rx) = tokio::sync::mpsc::unbounded_channel();
    let manager = manager();
    let observer = manager.submit(Job::new(TestJob::succeeding("X").build())).await.unwrap();
    observer.subscribe(move |update| {
        let _ = update_tx.send(update);
    });
    observer.wait_for_terminal_state(WAIT).await;

    let mut saw_terminal = false;
    while let Ok(update) = update_rx.try_recv() {
        assert_eq!(update.key, crate::observer::KEY_STATE_CHANGE);
        if update.state == JobState::Succeeded {
            saw_terminal = true;
        }
    }
    assert!(saw_terminal);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscribe_on_complete_fires_once_with_result() {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let manager = manager();
    let observer = manager.submit(Job::new(TestJob::succeeding("X").build())).await.unwrap();
    observer.subscribe_on_complete(move |observed| {
        let _ = done_tx.send(observed);
    });

    let observed = tokio::time::timeout(WAIT, done_rx).await.unwrap().unwrap();
    assert_eq!(observed.state, JobState::Succeeded);
    assert_eq!(observed.result, Some(serde_json::json!("X")));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn custom_clock_and_worker_cap_apply() {
    // A pool of one still finishes many jobs; this exercises permit reuse.
    let manager = builder().worker_cap(1).build();
    let mut observers = Vec::new();
    for i in 0..8 {
        let observer =
            manager.submit(Job::new(TestJob::succeeding(format!("r{i}")).build())).await.unwrap();
        observers.push(observer);
    }
    for (i, observer) in observers.iter().enumerate() {
        assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
        assert_eq!(observer.result(), Some(serde_json::json!(format!("r{i}"))));
    }
    manager.shutdown().await;
}
