// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-engine: the job scheduler and lifecycle runtime.
//!
//! A [`JobManager`] owns a single service-loop task that serializes every
//! state transition, a bounded worker pool for user work callbacks, and an
//! optional persistor. User code supplies a [`JobHandler`] per job and drives
//! it through [`JobManager::submit`].

mod error;
mod handler;
mod job;
mod manager;
mod observer;
mod registry;
mod runtime;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::EngineError;
pub use handler::{JobHandler, Scope};
pub use job::{Job, JobSnapshot};
pub use manager::{JobManager, JobManagerBuilder};
pub use observer::{JobObserver, Observed, StateUpdate, KEY_STATE_CHANGE};

pub use drover_core::{
    ConcurrencyPolicy, DependencyFailureStrategy, GatingCondition, JobId, JobRecord, JobState,
    RunPolicy,
};
