use super::{builder, WAIT};
use crate::job::Job;
use crate::testing::TestJob;
use drover_core::{JobId, JobState, RunPolicy};
use drover_storage::{MemoryStore, Persistor};
use std::sync::Arc;
use std::time::Duration;

fn upload_factory(
    payload: serde_json::Value,
) -> anyhow::Result<Arc<dyn crate::handler::JobHandler>> {
    let file = payload.get("file").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    Ok(Arc::new(
        TestJob::builder()
            .kind("upload")
            .payload(payload.clone())
            .work(|| async { Ok(JobState::Succeeded) })
            .result(file)
            .build(),
    ))
}

#[tokio::test(start_paused = true)]
async fn persistable_transitions_reach_the_store() {
    let store = MemoryStore::new();
    let manager = builder().persistor(store.clone()).build();

    let observer = manager
        .submit(Job::new(
            TestJob::builder()
                .kind("upload")
                .payload(serde_json::json!({"file": "a.txt"}))
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
                .build(),
        ))
        .await
        .unwrap();
    let id = observer.job_id().clone();

    // New -> Wait is persistable; the record lands in the store as Wait.
    tokio::time::sleep(Duration::from_secs(1)).await;
    let stored = store.get(&id).unwrap();
    assert_eq!(stored.state, JobState::Wait);
    assert_eq!(stored.payload, serde_json::json!({"file": "a.txt"}));
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn kindless_jobs_are_not_stored() {
    let store = MemoryStore::new();
    let manager = builder().persistor(store.clone()).build();

    let observer = manager
        .submit(Job::new(
            TestJob::builder()
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
                .build(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(store.is_empty());
    // The job still runs in memory.
    assert_eq!(observer.state(), JobState::Wait);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn work_loop_state_reloads_as_wait() {
    let store = MemoryStore::new();
    {
        let mut record = drover_core::JobRecord::new(JobId::new("job-restore"));
        record.state = JobState::Busy;
        record.kind = Some("upload".into());
        record.payload = serde_json::json!({"file": "resume.txt"});
        record.time_job_started_ms = 1;
        store.put_job(&record).unwrap();
    }

    let manager = builder().persistor(store.clone()).register("upload", upload_factory).build();

    // First access replays the store; the job resumes from Wait and runs to
    // completion.
    let id = JobId::new("job-restore");
    let snapshot = manager.get_job(&id).await.unwrap();
    assert!(matches!(snapshot.state(), JobState::Wait | JobState::Busy | JobState::Succeeded));

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match manager.get_job(&id).await {
            // Success evicts the record; either observation proves completion.
            None => break,
            Some(snapshot) if snapshot.state() == JobState::Succeeded => break,
            Some(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Some(snapshot) => panic!("job stuck in {}", snapshot.state()),
        }
    }
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_kinds_are_skipped_on_reload() {
    let store = MemoryStore::new();
    {
        let mut record = drover_core::JobRecord::new(JobId::new("job-mystery"));
        record.state = JobState::Wait;
        record.kind = Some("mystery".into());
        store.put_job(&record).unwrap();
    }

    let manager = builder().persistor(store.clone()).build();
    assert!(manager.get_job(&JobId::new("job-mystery")).await.is_none());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn terminal_jobs_are_evicted_from_registry_and_store() {
    let store = MemoryStore::new();
    let manager = builder().persistor(store.clone()).build();

    let observer = manager
        .submit(Job::new(
            TestJob::builder()
                .kind("upload")
                .payload(serde_json::json!({"file": "b.txt"}))
                .work(|| async { Ok(JobState::Succeeded) })
                .result("b")
                .build(),
        ))
        .await
        .unwrap();

    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Succeeded);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(manager.get_job(observer.job_id()).await.is_none());
    assert!(store.is_empty());
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn clear_wipes_store_and_reloads_lazily() {
    let store = MemoryStore::new();
    let manager = builder().persistor(store.clone()).register("upload", upload_factory).build();

    manager
        .submit(Job::new(
            TestJob::builder()
                .kind("upload")
                .payload(serde_json::json!({"file": "c.txt"}))
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
                .build(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.len(), 1);

    manager.clear().await;
    assert!(store.is_empty());
    assert!(manager.jobs().await.is_empty());
    manager.shutdown().await;
}

/// A store that accepts listing but rejects writes.
#[derive(Clone, Default)]
struct RejectingStore;

impl Persistor for RejectingStore {
    fn list_jobs(&self) -> Result<Vec<drover_core::JobRecord>, drover_storage::StoreError> {
        Ok(Vec::new())
    }

    fn put_job(&self, _: &drover_core::JobRecord) -> Result<(), drover_storage::StoreError> {
        Err(drover_storage::StoreError::Io(std::io::Error::other("disk full")))
    }

    fn remove_job(&self, _: &JobId) -> Result<(), drover_storage::StoreError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), drover_storage::StoreError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn persist_failure_cancels_the_job() {
    let manager = builder().persistor(RejectingStore).build();

    let observer = manager
        .submit(Job::new(
            TestJob::builder()
                .kind("upload")
                .policy(RunPolicy::builder().initial_delay(Duration::from_secs(3600)).build())
                .build(),
        ))
        .await
        .unwrap();

    assert_eq!(observer.wait_for_terminal_state(WAIT).await, JobState::Canceled);
    manager.shutdown().await;
}
