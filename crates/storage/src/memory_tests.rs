use super::*;
use drover_core::JobState;

#[test]
fn put_get_remove() {
    let store = MemoryStore::new();
    let mut record = JobRecord::new(JobId::new("job-a"));
    record.state = JobState::Wait;

    store.put_job(&record).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&JobId::new("job-a")), Some(record));

    store.remove_job(&JobId::new("job-a")).unwrap();
    assert!(store.is_empty());
}

#[test]
fn clones_share_state() {
    let store = MemoryStore::new();
    let handle = store.clone();
    store.put_job(&JobRecord::new(JobId::new("job-a"))).unwrap();
    assert_eq!(handle.len(), 1);
    handle.clear().unwrap();
    assert!(store.is_empty());
}

#[test]
fn list_returns_all_records() {
    let store = MemoryStore::new();
    store.put_job(&JobRecord::new(JobId::new("job-a"))).unwrap();
    store.put_job(&JobRecord::new(JobId::new("job-b"))).unwrap();
    assert_eq!(store.list_jobs().unwrap().len(), 2);
}
