//! Engine API errors.
//!
//! Only operations invoked by caller code (submit, dependency edits,
//! cross-task transition requests) surface errors; failures inside the
//! service loop or worker pool become state transitions instead.

use drover_core::{DependError, JobId, JobState, PolicyError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Depend(#[from] DependError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} is already registered")]
    AlreadyRegistered(JobId),

    #[error("state {0} cannot be requested")]
    InvalidRequestedState(JobState),

    #[error("job {0} is canceled; only a canceled no-op is accepted")]
    JobCanceled(JobId),

    #[error("manager is shut down")]
    Closed,
}
