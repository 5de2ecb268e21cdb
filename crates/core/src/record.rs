//! Serializable job snapshot.
//!
//! `JobRecord` is the unit the persistor stores, the view read-side APIs
//! return, and what collision/assimilation callbacks get to look at. The
//! engine owns the live copy; everything else sees clones.

use crate::depend::{DependencyFailureStrategy, DependencyMap};
use crate::error::DependError;
use crate::id::JobId;
use crate::state::JobState;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub state: JobState,
    /// Human-readable reason for the current state (policy exhaustion,
    /// gating, upstream fault).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_message: Option<String>,
    /// Stable handler type identifier. `None` means the job cannot be
    /// durably stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SmolStr>,
    /// Handler-owned payload, serialized by the handler itself.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    /// Outgoing depends-on edges.
    #[serde(default, skip_serializing_if = "DependencyMap::is_empty")]
    pub depends: DependencyMap,
    /// Epoch milliseconds when the job's policy clock started.
    pub time_job_started_ms: u64,
    /// Work product; present iff the job succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl JobRecord {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            state: JobState::New,
            state_message: None,
            kind: None,
            payload: serde_json::Value::Null,
            depends: DependencyMap::new(),
            time_job_started_ms: 0,
            result: None,
        }
    }

    /// Add or replace the outgoing edge to `target`.
    pub fn add_edge(
        &mut self,
        target: JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), DependError> {
        let id = self.id.clone();
        self.depends.insert(&id, target, strategy)
    }

    /// The job can unblock dependents.
    pub fn is_satisfied(&self) -> bool {
        self.state.is_satisfied()
    }

    /// Restore a freshly-listed record for replay: work-loop states were
    /// interrupted mid-flight and resume as `Wait`.
    pub fn normalized_for_reload(mut self) -> Self {
        if self.state.is_in_work_loop() {
            self.state = JobState::Wait;
        }
        self
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
