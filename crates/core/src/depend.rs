//! Dependency edges between jobs.

use crate::error::DependError;
use crate::id::JobId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What happens to a dependent when a depended job faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailureStrategy {
    /// The depended job's fault propagates to this job.
    CascadeFailure,
    /// This job may still attempt work after the depended job faults.
    IgnoreFailure,
}

impl std::fmt::Display for DependencyFailureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CascadeFailure => "cascade_failure",
            Self::IgnoreFailure => "ignore_failure",
        })
    }
}

/// A job's outgoing depends-on edges, in insertion order.
///
/// The map alone cannot see the rest of the graph; acyclicity is enforced by
/// the registry owning all jobs before an edge is committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap {
    edges: IndexMap<JobId, DependencyFailureStrategy>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the edge `owner -> target`. Rejects self-edges.
    pub fn insert(
        &mut self,
        owner: &JobId,
        target: JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), DependError> {
        if *owner == target {
            return Err(DependError::SelfDependency(target));
        }
        self.edges.insert(target, strategy);
        Ok(())
    }

    /// Remove the edge to `target`, returning its strategy if present.
    pub fn remove(&mut self, target: &JobId) -> Option<DependencyFailureStrategy> {
        self.edges.shift_remove(target)
    }

    /// The strategy of the edge to `target`, if one exists.
    pub fn mode(&self, target: &JobId) -> Option<DependencyFailureStrategy> {
        self.edges.get(target).copied()
    }

    pub fn contains(&self, target: &JobId) -> bool {
        self.edges.contains_key(target)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobId, DependencyFailureStrategy)> {
        self.edges.iter().map(|(id, s)| (id, *s))
    }

    /// Copy out the edge list (id, strategy) for iteration without borrowing.
    pub fn snapshot(&self) -> Vec<(JobId, DependencyFailureStrategy)> {
        self.edges.iter().map(|(id, s)| (id.clone(), *s)).collect()
    }
}

#[cfg(test)]
#[path = "depend_tests.rs"]
mod tests;
