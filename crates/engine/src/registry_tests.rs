use super::*;
use crate::job::Entry;
use crate::testing::TestJob;
use drover_core::{DependencyFailureStrategy, JobRecord, JobState};
use std::sync::Arc;

fn entry(id: &str) -> Entry {
    Entry::new(
        JobRecord::new(JobId::new(id)),
        Arc::new(TestJob::succeeding("x").build()),
        1_000,
    )
}

fn entry_in(id: &str, state: JobState) -> Entry {
    let mut entry = entry(id);
    entry.record.state = state;
    entry
}

fn link(registry: &mut Registry, from: &str, to: &str) {
    let from = JobId::new(from);
    let entry = registry.get_mut(&from).unwrap();
    entry
        .record
        .depends
        .insert(&from, JobId::new(to), DependencyFailureStrategy::IgnoreFailure)
        .unwrap();
}

#[tokio::test]
async fn cycle_detection_on_direct_loop() {
    let mut registry = Registry::new();
    registry.insert(entry("job-a"));
    registry.insert(entry("job-b"));
    link(&mut registry, "job-a", "job-b");
    assert!(!registry.has_cycle_through(&JobId::new("job-a")));
    link(&mut registry, "job-b", "job-a");
    assert!(registry.has_cycle_through(&JobId::new("job-a")));
    assert!(registry.has_cycle_through(&JobId::new("job-b")));
}

#[tokio::test]
async fn cycle_detection_on_transitive_loop() {
    let mut registry = Registry::new();
    for id in ["job-a", "job-b", "job-c"] {
        registry.insert(entry(id));
    }
    link(&mut registry, "job-a", "job-b");
    link(&mut registry, "job-b", "job-c");
    assert!(!registry.has_cycle_through(&JobId::new("job-a")));
    link(&mut registry, "job-c", "job-a");
    assert!(registry.has_cycle_through(&JobId::new("job-a")));
}

#[tokio::test]
async fn diamond_is_not_a_cycle() {
    let mut registry = Registry::new();
    for id in ["job-a", "job-b", "job-c", "job-d"] {
        registry.insert(entry(id));
    }
    link(&mut registry, "job-a", "job-b");
    link(&mut registry, "job-a", "job-c");
    link(&mut registry, "job-b", "job-d");
    link(&mut registry, "job-c", "job-d");
    assert!(!registry.has_cycle_through(&JobId::new("job-a")));
}

#[tokio::test]
async fn terminal_job_without_dependents_is_removable() {
    let mut registry = Registry::new();
    registry.insert(entry_in("job-a", JobState::Succeeded));
    registry.insert(entry_in("job-b", JobState::Busy));
    assert_eq!(registry.removable_ids(), vec![JobId::new("job-a")]);
}

#[tokio::test]
async fn active_dependent_pins_terminal_job() {
    let mut registry = Registry::new();
    registry.insert(entry_in("job-a", JobState::Faulted));
    registry.insert(entry_in("job-b", JobState::Wait));
    link(&mut registry, "job-b", "job-a");
    assert!(registry.removable_ids().is_empty());
}

#[tokio::test]
async fn removable_chain_unpins_together() {
    let mut registry = Registry::new();
    registry.insert(entry_in("job-a", JobState::Succeeded));
    registry.insert(entry_in("job-b", JobState::Succeeded));
    link(&mut registry, "job-b", "job-a");
    let removable = registry.removable_ids();
    assert!(removable.contains(&JobId::new("job-a")));
    assert!(removable.contains(&JobId::new("job-b")));
}

#[tokio::test]
async fn handler_override_blocks_removal() {
    let mut registry = Registry::new();
    let mut pinned = Entry::new(
        JobRecord::new(JobId::new("job-a")),
        Arc::new(TestJob::succeeding("x").removable(false).build()),
        1_000,
    );
    pinned.record.state = JobState::Succeeded;
    registry.insert(pinned);
    assert!(registry.removable_ids().is_empty());
}

#[tokio::test]
async fn sorted_snapshots_order_by_start_time() {
    let mut registry = Registry::new();
    let mut late = entry("job-late");
    late.record.time_job_started_ms = 2_000;
    let mut early = entry("job-early");
    early.record.time_job_started_ms = 1_000;
    registry.insert(late);
    registry.insert(early);

    let ids: Vec<String> =
        registry.sorted_snapshots().iter().map(|s| s.id().to_string()).collect();
    assert_eq!(ids, vec!["job-early", "job-late"]);
}

#[tokio::test]
async fn dependent_ids_finds_incoming_edges() {
    let mut registry = Registry::new();
    for id in ["job-a", "job-b", "job-c"] {
        registry.insert(entry(id));
    }
    link(&mut registry, "job-b", "job-a");
    link(&mut registry, "job-c", "job-a");
    let dependents = registry.dependent_ids(&JobId::new("job-a"));
    assert_eq!(dependents.len(), 2);
    assert!(dependents.contains(&JobId::new("job-b")));
    assert!(dependents.contains(&JobId::new("job-c")));
}
