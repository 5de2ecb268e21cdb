use super::*;

#[test]
fn generated_ids_are_unique_and_prefixed() {
    let a = JobId::generate();
    let b = JobId::generate();
    assert_ne!(a, b);
    assert!(a.as_str().starts_with(JobId::PREFIX));
    assert_eq!(a.as_str().len(), JobId::PREFIX.len() + 19);
}

#[test]
fn equality_is_by_value() {
    let a = JobId::new("job-upload-1");
    let b = JobId::new("job-upload-1");
    let c = JobId::new("job-upload-2");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, "job-upload-1");
}

#[test]
fn serde_is_transparent() {
    let id = JobId::new("job-x");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"job-x\"");
    let back: JobId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn usable_as_map_key_via_borrow() {
    let mut map = std::collections::HashMap::new();
    map.insert(JobId::new("job-k"), 1);
    assert_eq!(map.get("job-k"), Some(&1));
}
