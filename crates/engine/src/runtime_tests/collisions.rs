use super::{manager, WAIT};
use crate::job::Job;
use crate::testing::TestJob;
use drover_core::{ConcurrencyPolicy, DependencyFailureStrategy, JobState, RunPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn fifo_policy(key: &str) -> RunPolicy {
    RunPolicy::builder()
        .concurrency_policy(ConcurrencyPolicy::fifo([key]).unwrap())
        .build()
}

#[tokio::test(start_paused = true)]
async fn fifo_collision_serializes_jobs() {
    let manager = manager();
    let first = manager
        .submit(Job::new(
            TestJob::builder()
                .policy(fifo_policy("k"))
                .work(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(JobState::Succeeded)
                })
                .result("first")
                .build(),
        ))
        .await
        .unwrap();

    let second = manager
        .submit(Job::new(TestJob::succeeding("second").policy(fifo_policy("k")).build()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    // The newcomer queued behind the existing job with an ignore-failure
    // edge.
    let snapshot = manager.get_job(second.job_id()).await.unwrap();
    assert_eq!(
        snapshot.record.depends.mode(first.job_id()),
        Some(DependencyFailureStrategy::IgnoreFailure)
    );
    assert_eq!(second.state(), JobState::Wait);

    assert_eq!(first.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(second.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fifo_survivor_runs_after_head_faults() {
    let manager = manager();
    let first = manager
        .submit(Job::new(
            TestJob::builder()
                .policy(fifo_policy("k"))
                .work(|| async { anyhow::bail!("head broke") })
                .build(),
        ))
        .await
        .unwrap();

    let second = manager
        .submit(Job::new(TestJob::succeeding("second").policy(fifo_policy("k")).build()))
        .await
        .unwrap();

    assert_eq!(first.wait_for_terminal_state(WAIT).await, JobState::Faulted);
    assert_eq!(second.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn different_keys_do_not_collide() {
    let manager = manager();
    let a = manager
        .submit(Job::new(TestJob::succeeding("a").policy(fifo_policy("k1")).build()))
        .await
        .unwrap();
    let b = manager
        .submit(Job::new(TestJob::succeeding("b").policy(fifo_policy("k2")).build()))
        .await
        .unwrap();

    assert_eq!(a.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(b.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    let snapshot = manager.get_job(b.job_id()).await;
    if let Some(snapshot) = snapshot {
        assert!(snapshot.record.depends.is_empty());
    }
    manager.shutdown().await;
}

/// Keep-existing merge: the surviving job accumulates absorbed work-data in
/// submission order.
#[tokio::test(start_paused = true)]
async fn keep_existing_assimilates_and_merges() {
    let merged: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let keep = |key: &str| {
        RunPolicy::builder()
            .concurrency_policy(ConcurrencyPolicy::keep_existing([key]).unwrap())
            // Hold the survivor in Wait long enough to absorb the others.
            .initial_delay(Duration::from_secs(2))
            .build()
    };

    let survivor_merged = merged.clone();
    let work_merged = merged.clone();
    let survivor = TestJob::builder()
        .policy(keep("batch"))
        .payload(serde_json::json!({"item": "a"}))
        .assimilate(move |redundant| {
            if let Some(item) = redundant.payload.get("item").and_then(|v| v.as_str()) {
                survivor_merged.lock().push(item.to_string());
                true
            } else {
                false
            }
        })
        .work(move || {
            let merged = work_merged.clone();
            async move {
                let batch: Vec<String> = merged.lock().clone();
                Ok(if batch.len() == 2 { JobState::Succeeded } else { JobState::Faulted })
            }
        })
        .result("merged")
        .build();

    let manager = manager();
    let a = manager.submit(Job::new(survivor)).await.unwrap();

    let b = manager
        .submit(Job::new(
            TestJob::builder()
                .policy(keep("batch"))
                .payload(serde_json::json!({"item": "b"}))
                .build(),
        ))
        .await
        .unwrap();
    let c = manager
        .submit(Job::new(
            TestJob::builder()
                .policy(keep("batch"))
                .payload(serde_json::json!({"item": "c"}))
                .build(),
        ))
        .await
        .unwrap();

    assert_eq!(b.wait_for_terminal_state(WAIT).await, JobState::Assimilated);
    assert_eq!(c.wait_for_terminal_state(WAIT).await, JobState::Assimilated);
    assert_eq!(a.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(*merged.lock(), vec!["b".to_string(), "c".to_string()]);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn keep_existing_falls_back_to_fifo_edge() {
    let keep = || {
        RunPolicy::builder()
            .concurrency_policy(ConcurrencyPolicy::keep_existing(["k"]).unwrap())
            .initial_delay(Duration::from_secs(1))
            .build()
    };

    let manager = manager();
    // No assimilate hook: the merge is refused.
    let first =
        manager.submit(Job::new(TestJob::succeeding("first").policy(keep()).build())).await.unwrap();
    let second = manager
        .submit(Job::new(TestJob::succeeding("second").policy(keep()).build()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let snapshot = manager.get_job(second.job_id()).await.unwrap();
    assert_eq!(
        snapshot.record.depends.mode(first.job_id()),
        Some(DependencyFailureStrategy::IgnoreFailure)
    );
    assert_eq!(first.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(second.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replace_existing_assimilates_the_incumbent() {
    let replace = || {
        RunPolicy::builder()
            .concurrency_policy(ConcurrencyPolicy::replace_existing(["cfg"]).unwrap())
            .initial_delay(Duration::from_secs(1))
            .build()
    };

    let manager = manager();
    let incumbent = manager
        .submit(Job::new(TestJob::succeeding("old").policy(replace()).build()))
        .await
        .unwrap();

    let newcomer = manager
        .submit(Job::new(
            TestJob::succeeding("new").policy(replace()).assimilate(|_| true).build(),
        ))
        .await
        .unwrap();

    assert_eq!(incumbent.wait_for_terminal_state(WAIT).await, JobState::Assimilated);
    assert_eq!(newcomer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    assert_eq!(newcomer.result(), Some(serde_json::json!("new")));
    manager.shutdown().await;
}

/// After assimilation, edges pointing at the absorbed job are rewritten to
/// its assimilator.
#[tokio::test(start_paused = true)]
async fn assimilation_rewrites_dependent_edges() {
    let keep = || {
        RunPolicy::builder()
            .concurrency_policy(ConcurrencyPolicy::keep_existing(["k"]).unwrap())
            .initial_delay(Duration::from_secs(2))
            .build()
    };

    let manager = manager();
    let survivor = manager
        .submit(Job::new(
            TestJob::succeeding("survivor").policy(keep()).assimilate(|_| true).build(),
        ))
        .await
        .unwrap();

    // Pinned in the registry so the edge added below still finds it.
    let redundant = manager
        .submit(Job::new(
            TestJob::succeeding("redundant").policy(keep()).removable(false).build(),
        ))
        .await
        .unwrap();
    assert_eq!(redundant.wait_for_terminal_state(WAIT).await, JobState::Assimilated);

    // A third job depending on the assimilated one is rewritten to the
    // assimilator at edge-add time.
    let mut watcher_job = Job::new(TestJob::succeeding("watcher").build());
    watcher_job
        .depends_on(redundant.job_id(), DependencyFailureStrategy::CascadeFailure)
        .unwrap();
    let watcher = manager.submit(watcher_job).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let snapshot = manager.get_job(watcher.job_id()).await.unwrap();
    assert!(snapshot.record.depends.contains(survivor.job_id()));
    assert!(!snapshot.record.depends.contains(redundant.job_id()));

    assert_eq!(watcher.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}

/// Live edges to the absorbed job move over at assimilation time: when a
/// newcomer replaces the incumbent, the incumbent's dependents follow.
#[tokio::test(start_paused = true)]
async fn assimilation_moves_existing_edges() {
    let replace = || {
        RunPolicy::builder()
            .concurrency_policy(ConcurrencyPolicy::replace_existing(["cfg"]).unwrap())
            .initial_delay(Duration::from_secs(2))
            .build()
    };

    let manager = manager();
    let incumbent = manager
        .submit(Job::new(TestJob::succeeding("old").policy(replace()).build()))
        .await
        .unwrap();

    let waiting = manager
        .submit(Job::new(
            TestJob::succeeding("waiting")
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(1)).build())
                .build(),
        ))
        .await
        .unwrap();
    manager
        .add_dependency(
            waiting.job_id(),
            incumbent.job_id(),
            DependencyFailureStrategy::CascadeFailure,
        )
        .await
        .unwrap();

    let newcomer = manager
        .submit(Job::new(
            TestJob::succeeding("new").policy(replace()).assimilate(|_| true).build(),
        ))
        .await
        .unwrap();

    assert_eq!(incumbent.wait_for_terminal_state(WAIT).await, JobState::Assimilated);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snapshot = manager.get_job(waiting.job_id()).await.unwrap();
    assert!(!snapshot.record.depends.contains(incumbent.job_id()));
    assert_eq!(
        snapshot.record.depends.mode(newcomer.job_id()),
        Some(DependencyFailureStrategy::CascadeFailure)
    );
    assert_eq!(waiting.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    manager.shutdown().await;
}
