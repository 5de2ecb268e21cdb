//! Error types for policy binding and dependency edges.

use crate::id::JobId;
use thiserror::Error;

/// Errors raised by [`crate::RunPolicy`] binding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("run policy is already bound to job {bound}, cannot re-bind to {requested}")]
    AlreadyBound { bound: JobId, requested: JobId },
}

/// Errors raised while adding or validating dependency edges.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DependError {
    #[error("job {0} cannot depend on itself")]
    SelfDependency(JobId),

    #[error("depended job {0} is not active in this manager")]
    NotActive(JobId),

    #[error("dependency {from} -> {to} would close a cycle")]
    Cycle { from: JobId, to: JobId },
}
