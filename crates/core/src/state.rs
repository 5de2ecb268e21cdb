//! Job lifecycle states and their predicates.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
///
/// A job enters at [`JobState::New`], cycles through the work loop
/// (`Wait`/`Ready`/`Busy`) under its run policy, and settles in exactly one
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Submitted but not yet enqueued by the service loop.
    New,
    /// Waiting on dependencies, gating, or a retry delay.
    Wait,
    /// Eligible to start an attempt.
    Ready,
    /// An attempt is executing on the worker pool.
    Busy,
    /// Finished with a result.
    Succeeded,
    /// Finished unsuccessfully (policy exhaustion, timeout, or callback error).
    Faulted,
    /// Explicitly canceled.
    Canceled,
    /// Merged into a surviving job by a concurrency policy.
    Assimilated,
}

impl JobState {
    /// No further transitions occur out of a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Faulted | Self::Canceled | Self::Assimilated)
    }

    /// Terminal without having produced a result.
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Faulted | Self::Canceled)
    }

    /// States the service loop actively drives.
    pub fn is_in_work_loop(self) -> bool {
        matches!(self, Self::Wait | Self::Ready | Self::Busy)
    }

    /// States before any attempt has produced output.
    pub fn is_pre_execute(self) -> bool {
        matches!(self, Self::New | Self::Wait | Self::Ready)
    }

    /// A satisfied job can unblock its dependents.
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Succeeded | Self::Assimilated)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::New => "new",
            Self::Wait => "wait",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Succeeded => "succeeded",
            Self::Faulted => "faulted",
            Self::Canceled => "canceled",
            Self::Assimilated => "assimilated",
        })
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
