//! End-to-end scenarios across the workspace crates.

use drover_core::{ConcurrencyPolicy, DependencyFailureStrategy, JobState, RunPolicy};
use drover_engine::testing::{TestJob, TokioClock};
use drover_engine::{Job, JobManager};
use drover_storage::{JsonDirStore, Persistor};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn manager() -> JobManager {
    JobManager::builder().clock(TokioClock::new()).worker_cap(4).build()
}

/// S1: a single job succeeds and the observer reads its result.
#[tokio::test(start_paused = true)]
async fn single_job_succeeds_with_result() {
    let manager = manager();
    let observer = manager.submit(Job::new(TestJob::succeeding("X").build())).await.unwrap();

    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(observer.result(), Some(serde_json::json!("X")));
    assert_eq!(observer.await_result(WAIT).await, Some(serde_json::json!("X")));
    manager.shutdown().await;
}

/// S2: exponential backoff 100 ms -> 400 ms produces the delay ladder
/// 100, 200, 400, 400, 400 between consecutive attempts.
#[tokio::test(start_paused = true)]
async fn exponential_backoff_delay_ladder() {
    let starts: Arc<Mutex<Vec<tokio::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let work_starts = starts.clone();
    let handler = TestJob::builder()
        .policy(
            RunPolicy::builder()
                .max_attempts(10)
                .exponential_backoff_of(Duration::from_millis(100), Duration::from_millis(400))
                .build(),
        )
        .work(move || {
            let starts = work_starts.clone();
            async move {
                let count = {
                    let mut starts = starts.lock();
                    starts.push(tokio::time::Instant::now());
                    starts.len()
                };
                Ok(if count < 7 { JobState::Ready } else { JobState::Succeeded })
            }
        })
        .result("done")
        .build();

    let manager = manager();
    let observer = manager.submit(Job::new(handler)).await.unwrap();
    assert_eq!(observer.wait_for_terminal_state(Duration::from_secs(30)).await, JobState::Succeeded);

    let starts = starts.lock();
    assert_eq!(starts.len(), 7);
    let expected = [100u64, 200, 400, 400, 400];
    for (k, expected_ms) in expected.iter().enumerate() {
        let gap = starts[k + 1].duration_since(starts[k]);
        let gap_ms = gap.as_millis() as i64;
        assert!(
            (gap_ms - *expected_ms as i64).abs() <= 25,
            "failure {} gap {}ms, expected ~{}ms",
            k + 1,
            gap_ms,
            expected_ms
        );
    }
    manager.shutdown().await;
}

/// S3: FIFO collision queues B behind A with an ignore-failure edge; A's
/// fault does not stop B.
#[tokio::test(start_paused = true)]
async fn fifo_collision_survives_head_failure() {
    let fifo = || {
        RunPolicy::builder().concurrency_policy(ConcurrencyPolicy::fifo(["k"]).unwrap()).build()
    };

    let manager = manager();
    let a = manager
        .submit(Job::new(
            TestJob::builder().policy(fifo()).work(|| async { anyhow::bail!("a failed") }).build(),
        ))
        .await
        .unwrap();
    let b = manager
        .submit(Job::new(TestJob::succeeding("b ran").policy(fifo()).build()))
        .await
        .unwrap();

    // B acquired an ignore-failure edge to A.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = manager.get_job(b.job_id()).await.unwrap();
    assert_eq!(
        snapshot.record.depends.mode(a.job_id()),
        Some(DependencyFailureStrategy::IgnoreFailure)
    );

    assert_eq!(a.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(b.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(b.result(), Some(serde_json::json!("b ran")));
    manager.shutdown().await;
}

/// S4: keep-existing collisions merge redundant jobs into the waiting
/// survivor; the absorbed work-data accumulates in submission order.
#[tokio::test(start_paused = true)]
async fn keep_existing_merges_work_in_submission_order() {
    let absorbed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let keyed = || {
        RunPolicy::builder()
            .concurrency_policy(ConcurrencyPolicy::keep_existing(["batch", "7"]).unwrap())
            .initial_delay(Duration::from_secs(1))
            .build()
    };

    let merge_sink = absorbed.clone();
    let work_view = absorbed.clone();
    let survivor = TestJob::builder()
        .policy(keyed())
        .assimilate(move |redundant| {
            match redundant.payload.get("item").and_then(|v| v.as_str()) {
                Some(item) => {
                    merge_sink.lock().push(item.to_string());
                    true
                }
                None => false,
            }
        })
        .work(move || {
            let absorbed = work_view.clone();
            async move {
                let _union: Vec<String> = absorbed.lock().clone();
                Ok(JobState::Succeeded)
            }
        })
        .result("union")
        .build();

    let manager = manager();
    let a = manager.submit(Job::new(survivor)).await.unwrap();
    let b = manager
        .submit(Job::new(
            TestJob::builder().policy(keyed()).payload(serde_json::json!({"item": "b"})).build(),
        ))
        .await
        .unwrap();
    let c = manager
        .submit(Job::new(
            TestJob::builder().policy(keyed()).payload(serde_json::json!({"item": "c"})).build(),
        ))
        .await
        .unwrap();

    assert_eq!(b.wait_for_terminal_state(WAIT).await, JobState::Assimilated);
    assert_eq!(c.wait_for_terminal_state(WAIT).await, JobState::Assimilated);
    assert_eq!(a.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(*absorbed.lock(), vec!["b".to_string(), "c".to_string()]);
    manager.shutdown().await;
}

/// S5: a cascade edge propagates the upstream fault within a service pass,
/// and the fault message names the upstream job.
#[tokio::test(start_paused = true)]
async fn cascade_failure_names_the_upstream_job() {
    let manager = manager();
    let b = manager
        .submit(Job::new(
            TestJob::builder().work(|| async { anyhow::bail!("b exploded") }).build(),
        ))
        .await
        .unwrap();

    let mut a_job = Job::new(TestJob::succeeding("a").build());
    a_job.depends_on(b.job_id(), DependencyFailureStrategy::CascadeFailure).unwrap();
    let a = manager.submit(a_job).await.unwrap();

    assert_eq!(b.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(a.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    let message = a.state_message().unwrap_or_default();
    assert!(message.contains(b.job_id().as_str()), "unexpected message: {message}");
    manager.shutdown().await;
}

/// S6: an edge that would close a cycle is rejected and leaves the graph
/// unchanged.
#[tokio::test(start_paused = true)]
async fn cycle_rejection_leaves_edges_empty() {
    let parked = || RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build();

    let manager = manager();
    let a = manager
        .submit(Job::new(TestJob::succeeding("a").policy(parked()).build()))
        .await
        .unwrap();
    let mut b_job = Job::new(TestJob::succeeding("b").policy(parked()).build());
    b_job.depends_on(a.job_id(), DependencyFailureStrategy::CascadeFailure).unwrap();
    let b = manager.submit(b_job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = manager
        .add_dependency(a.job_id(), b.job_id(), DependencyFailureStrategy::CascadeFailure)
        .await;
    assert!(err.is_err());

    let snapshot = manager.get_job(a.job_id()).await.unwrap();
    assert!(snapshot.record.depends.is_empty());
    manager.shutdown().await;
}

/// Persistor round trip: a durable job survives a manager restart, resuming
/// from Wait.
#[tokio::test(start_paused = true)]
async fn durable_job_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let gate_file = dir.path().join("allow");

    let factory = {
        let gate_file = gate_file.clone();
        move |payload: serde_json::Value| -> anyhow::Result<Arc<dyn drover_engine::JobHandler>> {
            let gate_file = gate_file.clone();
            Ok(Arc::new(
                TestJob::builder()
                    .kind("copy")
                    .payload(payload)
                    .work(move || {
                        let gate_file = gate_file.clone();
                        async move {
                            // Park until the test flips the switch.
                            Ok(if gate_file.exists() {
                                JobState::Succeeded
                            } else {
                                JobState::Ready
                            })
                        }
                    })
                    .result("copied")
                    .build(),
            ))
        }
    };

    let store_dir = dir.path().join("jobs");
    let first = JobManager::builder()
        .clock(TokioClock::new())
        .persistor(JsonDirStore::new(&store_dir).unwrap())
        .register("copy", factory.clone())
        .build();

    let job = Job::new(
        TestJob::builder()
            .kind("copy")
            .payload(serde_json::json!({"src": "a", "dst": "b"}))
            .policy(
                RunPolicy::builder()
                    .max_attempts(50)
                    .retry_delay(Duration::from_millis(100))
                    .build(),
            )
            .work({
                let gate_file = gate_file.clone();
                move || {
                    let gate_file = gate_file.clone();
                    async move {
                        Ok(if gate_file.exists() { JobState::Succeeded } else { JobState::Ready })
                    }
                }
            })
            .result("copied")
            .build(),
    );
    let id = job.id().clone();
    first.submit(job).await.unwrap();

    // Let it burn an attempt or two, then stop the first manager.
    tokio::time::sleep(Duration::from_millis(400)).await;
    first.shutdown().await;

    let stored = JsonDirStore::new(&store_dir).unwrap().list_jobs().unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].state.is_in_work_loop());

    // Restart: the job reloads as Wait and completes once allowed to.
    std::fs::write(&gate_file, b"go").unwrap();
    let second = JobManager::builder()
        .clock(TokioClock::new())
        .persistor(JsonDirStore::new(&store_dir).unwrap())
        .register("copy", factory)
        .build();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        match second.get_job(&id).await {
            Some(snapshot) if snapshot.state() == JobState::Succeeded => break,
            // Eviction after success also proves completion.
            None => break,
            Some(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Some(snapshot) => panic!("restarted job stuck in {}", snapshot.state()),
        }
    }
    assert!(JsonDirStore::new(&store_dir).unwrap().list_jobs().unwrap().is_empty());
    second.shutdown().await;
}

/// Double cancel settles in one state and runs rollback at most once.
#[tokio::test(start_paused = true)]
async fn cancel_twice_single_rollback() {
    let rollbacks = Arc::new(AtomicU32::new(0));
    let rollback_count = rollbacks.clone();

    let manager = manager();
    let observer = manager
        .submit(Job::new(
            TestJob::builder()
                .work(|| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(JobState::Succeeded)
                })
                .rollback(move || {
                    rollback_count.fetch_add(1, Ordering::SeqCst);
                })
                .build(),
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    observer.cancel().await;
    let first = observer.wait_for_terminal_state(WAIT).await;
    observer.cancel().await;
    let second = observer.wait_for_terminal_state(WAIT).await;

    assert_eq!(first, JobState::Canceled);
    assert_eq!(second, JobState::Canceled);
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
    manager.shutdown().await;
}
