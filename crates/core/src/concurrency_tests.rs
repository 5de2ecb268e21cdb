use super::*;
use yare::parameterized;

#[test]
fn key_components_must_be_non_empty() {
    assert_eq!(CollisionKey::new(Vec::<&str>::new()), Err(EmptyKeyComponent));
    assert_eq!(CollisionKey::new(["a", ""]), Err(EmptyKeyComponent));
    assert!(CollisionKey::new(["a", "b"]).is_ok());
}

#[test]
fn key_equality_is_pairwise_and_ordered() {
    let ab = CollisionKey::new(["a", "b"]).unwrap();
    let ab2 = CollisionKey::new(["a", "b"]).unwrap();
    let ba = CollisionKey::new(["b", "a"]).unwrap();
    assert_eq!(ab, ab2);
    assert_ne!(ab, ba);
}

#[test]
fn collision_requires_same_variant_and_key() {
    let fifo = ConcurrencyPolicy::fifo(["upload", "42"]).unwrap();
    let fifo2 = ConcurrencyPolicy::fifo(["upload", "42"]).unwrap();
    let fifo_other = ConcurrencyPolicy::fifo(["upload", "43"]).unwrap();
    let keep = ConcurrencyPolicy::keep_existing(["upload", "42"]).unwrap();

    assert!(fifo.collides_with(&fifo2));
    assert!(!fifo.collides_with(&fifo_other));
    assert!(!fifo.collides_with(&keep));
}

#[parameterized(
    fifo = { ConcurrencyPolicy::fifo(["k"]).unwrap(), "fifo" },
    keep = { ConcurrencyPolicy::keep_existing(["k"]).unwrap(), "keep_existing" },
    replace = { ConcurrencyPolicy::replace_existing(["k"]).unwrap(), "replace_existing" },
)]
fn display_names(policy: ConcurrencyPolicy, expected: &str) {
    assert_eq!(policy.to_string(), expected);
}

#[test]
fn key_display_joins_parts() {
    let key = CollisionKey::new(["sync", "acct-7"]).unwrap();
    assert_eq!(key.to_string(), "sync:acct-7");
}

#[test]
fn serde_round_trip() {
    let policy = ConcurrencyPolicy::keep_existing(["a", "b"]).unwrap();
    let json = serde_json::to_string(&policy).unwrap();
    let back: ConcurrencyPolicy = serde_json::from_str(&json).unwrap();
    assert_eq!(back, policy);
}
