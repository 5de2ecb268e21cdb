use super::*;
use drover_core::JobState;

fn record(id: &str, state: JobState) -> JobRecord {
    let mut record = JobRecord::new(JobId::new(id));
    record.state = state;
    record.kind = Some("upload".into());
    record.payload = serde_json::json!({"file": format!("{id}.bin")});
    record.time_job_started_ms = 1_000;
    record
}

#[test]
fn put_list_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonDirStore::new(dir.path()).unwrap();

    store.put_job(&record("job-a", JobState::Wait)).unwrap();
    store.put_job(&record("job-b", JobState::Succeeded)).unwrap();

    let mut listed = store.list_jobs().unwrap();
    listed.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0], record("job-a", JobState::Wait));
    assert_eq!(listed[1], record("job-b", JobState::Succeeded));
}

#[test]
fn put_replaces_existing_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonDirStore::new(dir.path()).unwrap();

    store.put_job(&record("job-a", JobState::Wait)).unwrap();
    store.put_job(&record("job-a", JobState::Faulted)).unwrap();

    let listed = store.list_jobs().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, JobState::Faulted);
}

#[test]
fn remove_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonDirStore::new(dir.path()).unwrap();

    store.put_job(&record("job-a", JobState::Wait)).unwrap();
    store.remove_job(&JobId::new("job-a")).unwrap();
    store.remove_job(&JobId::new("job-a")).unwrap();
    assert!(store.list_jobs().unwrap().is_empty());
}

#[test]
fn corrupt_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonDirStore::new(dir.path()).unwrap();

    store.put_job(&record("job-a", JobState::Wait)).unwrap();
    std::fs::write(dir.path().join("job-bad.json"), "{not json").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let listed = store.list_jobs().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "job-a");
}

#[test]
fn clear_removes_all_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonDirStore::new(dir.path()).unwrap();

    store.put_job(&record("job-a", JobState::Wait)).unwrap();
    store.put_job(&record("job-b", JobState::Wait)).unwrap();
    store.clear().unwrap();
    assert!(store.list_jobs().unwrap().is_empty());
}

#[test]
fn creates_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("state/jobs");
    let store = JsonDirStore::new(&nested).unwrap();
    assert!(nested.is_dir());
    assert!(store.list_jobs().unwrap().is_empty());
}
