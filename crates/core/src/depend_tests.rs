use super::*;

fn id(s: &str) -> JobId {
    JobId::new(s)
}

#[test]
fn self_edge_is_rejected() {
    let mut edges = DependencyMap::new();
    let owner = id("job-a");
    let err = edges.insert(&owner, owner.clone(), DependencyFailureStrategy::CascadeFailure);
    assert_eq!(err, Err(DependError::SelfDependency(owner)));
    assert!(edges.is_empty());
}

#[test]
fn insert_and_mode() {
    let mut edges = DependencyMap::new();
    let owner = id("job-a");
    edges.insert(&owner, id("job-b"), DependencyFailureStrategy::CascadeFailure).unwrap();
    edges.insert(&owner, id("job-c"), DependencyFailureStrategy::IgnoreFailure).unwrap();

    assert_eq!(edges.mode(&id("job-b")), Some(DependencyFailureStrategy::CascadeFailure));
    assert_eq!(edges.mode(&id("job-c")), Some(DependencyFailureStrategy::IgnoreFailure));
    assert_eq!(edges.mode(&id("job-d")), None);
    assert_eq!(edges.len(), 2);
}

#[test]
fn insert_overwrites_strategy() {
    let mut edges = DependencyMap::new();
    let owner = id("job-a");
    edges.insert(&owner, id("job-b"), DependencyFailureStrategy::IgnoreFailure).unwrap();
    edges.insert(&owner, id("job-b"), DependencyFailureStrategy::CascadeFailure).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges.mode(&id("job-b")), Some(DependencyFailureStrategy::CascadeFailure));
}

#[test]
fn remove_returns_strategy() {
    let mut edges = DependencyMap::new();
    let owner = id("job-a");
    edges.insert(&owner, id("job-b"), DependencyFailureStrategy::CascadeFailure).unwrap();
    assert_eq!(edges.remove(&id("job-b")), Some(DependencyFailureStrategy::CascadeFailure));
    assert_eq!(edges.remove(&id("job-b")), None);
}

#[test]
fn snapshot_preserves_insertion_order() {
    let mut edges = DependencyMap::new();
    let owner = id("job-a");
    edges.insert(&owner, id("job-1"), DependencyFailureStrategy::IgnoreFailure).unwrap();
    edges.insert(&owner, id("job-2"), DependencyFailureStrategy::IgnoreFailure).unwrap();
    edges.insert(&owner, id("job-3"), DependencyFailureStrategy::IgnoreFailure).unwrap();

    let ids: Vec<String> = edges.snapshot().into_iter().map(|(id, _)| id.to_string()).collect();
    assert_eq!(ids, vec!["job-1", "job-2", "job-3"]);
}

#[test]
fn serde_round_trip() {
    let mut edges = DependencyMap::new();
    let owner = id("job-a");
    edges.insert(&owner, id("job-b"), DependencyFailureStrategy::CascadeFailure).unwrap();
    let json = serde_json::to_string(&edges).unwrap();
    let back: DependencyMap = serde_json::from_str(&json).unwrap();
    assert_eq!(back, edges);
}
