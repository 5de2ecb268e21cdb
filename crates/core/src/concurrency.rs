//! Concurrency identity and collision resolution strategy.
//!
//! Two active jobs collide when their policies share a variant and an equal
//! key; the variant decides who survives.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Ordered multi-part collision key.
///
/// Components are compared pairwise; every component must be non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollisionKey(Vec<SmolStr>);

impl CollisionKey {
    /// Build a key from ordered components. Empty components (or an empty
    /// component list) are rejected.
    pub fn new<I, S>(parts: I) -> Result<Self, EmptyKeyComponent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<SmolStr> = parts.into_iter().map(|p| SmolStr::new(p.as_ref())).collect();
        if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return Err(EmptyKeyComponent);
        }
        Ok(Self(parts))
    }

    pub fn parts(&self) -> &[SmolStr] {
        &self.0
    }
}

impl std::fmt::Display for CollisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                f.write_str(":")?;
            }
            f.write_str(part)?;
            first = false;
        }
        Ok(())
    }
}

/// A collision key must not contain empty components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("collision key components must be non-empty")]
pub struct EmptyKeyComponent;

/// Keyed collision resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "key", rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Colliding jobs serialize: the newcomer waits on the existing job.
    Fifo(CollisionKey),
    /// The existing job absorbs the newcomer when it can.
    KeepExisting(CollisionKey),
    /// The newcomer absorbs the existing job when it can.
    ReplaceExisting(CollisionKey),
}

impl ConcurrencyPolicy {
    pub fn fifo<I, S>(parts: I) -> Result<Self, EmptyKeyComponent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CollisionKey::new(parts).map(Self::Fifo)
    }

    pub fn keep_existing<I, S>(parts: I) -> Result<Self, EmptyKeyComponent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CollisionKey::new(parts).map(Self::KeepExisting)
    }

    pub fn replace_existing<I, S>(parts: I) -> Result<Self, EmptyKeyComponent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        CollisionKey::new(parts).map(Self::ReplaceExisting)
    }

    pub fn key(&self) -> &CollisionKey {
        match self {
            Self::Fifo(k) | Self::KeepExisting(k) | Self::ReplaceExisting(k) => k,
        }
    }

    /// Two policies collide iff they are the same variant with an equal key.
    pub fn collides_with(&self, other: &ConcurrencyPolicy) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other) && self.key() == other.key()
    }
}

impl std::fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fifo(..) => "fifo",
            Self::KeepExisting(..) => "keep_existing",
            Self::ReplaceExisting(..) => "replace_existing",
        })
    }
}

#[cfg(test)]
#[path = "concurrency_tests.rs"]
mod tests;
