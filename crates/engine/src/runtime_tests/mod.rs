//! Engine behavior tests, driven through the public `JobManager` API under
//! paused tokio time.

mod collisions;
mod dependencies;
mod persistence;
mod service;

use crate::manager::{JobManager, JobManagerBuilder};
use crate::testing::TokioClock;
use std::time::Duration;

pub(crate) const WAIT: Duration = Duration::from_secs(30);

/// Manager with a paused-time-friendly clock and a small pool.
pub(crate) fn manager() -> JobManager {
    builder().build()
}

pub(crate) fn builder() -> JobManagerBuilder<TokioClock> {
    JobManager::builder().clock(TokioClock::new()).worker_cap(4)
}
