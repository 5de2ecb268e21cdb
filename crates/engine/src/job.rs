//! The user-facing `Job` value and the engine's live entry for it.

use crate::handler::JobHandler;
use crate::observer::{Observed, StateUpdate};
use drover_core::{
    DependError, DependencyFailureStrategy, JobId, JobRecord, JobState, RunPolicy,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;

/// Floor for every scheduled wake.
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);
const POLL_GROWTH: f64 = 1.2;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// A unit of work ready for submission.
///
/// Created detached from any manager; [`crate::JobManager::submit`] consumes
/// it, which is what makes the bind one-shot.
pub struct Job {
    pub(crate) record: JobRecord,
    pub(crate) handler: Arc<dyn JobHandler>,
}

impl Job {
    /// Wrap a handler in a job with a generated id.
    pub fn new(handler: impl JobHandler) -> Self {
        Self::with_id(JobId::generate(), handler)
    }

    /// Wrap a handler with an explicit id (replay, tests).
    pub fn with_id(id: JobId, handler: impl JobHandler) -> Self {
        let handler: Arc<dyn JobHandler> = Arc::new(handler);
        let mut record = JobRecord::new(id);
        record.kind = handler.kind().map(Into::into);
        record.payload = handler.payload().unwrap_or(serde_json::Value::Null);
        Self { record, handler }
    }

    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    /// Declare a depends-on edge before submission. Only the self-edge rule
    /// can be checked here; target existence and acyclicity are validated by
    /// `submit`.
    pub fn depends_on(
        &mut self,
        target: &JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), DependError> {
        self.record.add_edge(target.clone(), strategy)
    }
}

/// Read-side view of a registered job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub record: JobRecord,
    /// The surviving job this one was merged into, if assimilated.
    pub assimilated_by: Option<JobId>,
    /// Remaining attempt budget; `None` before the policy is attached.
    pub attempts_remaining: Option<u32>,
    /// Effective state message: the record's, or the policy's (gating).
    pub state_message: Option<String>,
    /// Accumulated time spent in each state so far.
    pub state_durations: HashMap<JobState, Duration>,
}

impl JobSnapshot {
    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    pub fn state(&self) -> JobState {
        self.record.state
    }
}

/// Adaptive poll interval: resets on state change, grows 1.2x otherwise,
/// capped at ten seconds.
#[derive(Debug)]
pub(crate) struct PollInterval {
    current: Duration,
}

impl PollInterval {
    pub fn new() -> Self {
        Self { current: DEFAULT_POLL_INTERVAL }
    }

    pub fn reset(&mut self) {
        self.current = DEFAULT_POLL_INTERVAL;
    }

    /// Grow and return the new interval.
    pub fn increment(&mut self) -> Duration {
        self.current = self.current.mul_f64(POLL_GROWTH).min(MAX_POLL_INTERVAL);
        self.current
    }
}

/// Handle on the in-flight attempt's task.
pub(crate) struct WorkerHandle {
    pub seq: u64,
    pub abort: AbortHandle,
}

/// Live state for one registered job. Owned exclusively by the service loop.
pub(crate) struct Entry {
    pub record: JobRecord,
    pub handler: Arc<dyn JobHandler>,
    /// Attached on the first service pass (or lazily by an early transition
    /// request).
    pub policy: Option<RunPolicy>,
    pub dirty: bool,
    pub assimilated_by: Option<JobId>,
    pub poll: PollInterval,
    /// Monotonic attempt counter; stale worker completions are dropped by
    /// comparing against it.
    pub attempt_seq: u64,
    pub worker: Option<WorkerHandle>,
    /// Monotonic wake counter; stale delay-queue entries are dropped by
    /// comparing against it.
    pub wake_seq: u64,
    /// Dependents to service when this job reaches a terminal state.
    pub notify_on_done: indexmap::IndexSet<JobId>,
    pub state_entered_ms: u64,
    pub durations: HashMap<JobState, Duration>,
    pub state_tx: watch::Sender<Observed>,
    pub updates_tx: broadcast::Sender<StateUpdate>,
}

impl Entry {
    pub fn new(record: JobRecord, handler: Arc<dyn JobHandler>, now_ms: u64) -> Self {
        let (state_tx, _) = watch::channel(Observed {
            state: record.state,
            message: record.state_message.clone(),
            result: record.result.clone(),
        });
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            record,
            handler,
            policy: None,
            dirty: false,
            assimilated_by: None,
            poll: PollInterval::new(),
            attempt_seq: 0,
            worker: None,
            wake_seq: 0,
            notify_on_done: indexmap::IndexSet::new(),
            state_entered_ms: now_ms,
            durations: HashMap::new(),
            state_tx,
            updates_tx,
        }
    }

    pub fn state(&self) -> JobState {
        self.record.state
    }

    /// Effective state message: the record's, falling back to the policy's
    /// (e.g. an unsatisfied gate).
    pub fn message(&self) -> Option<String> {
        self.record
            .state_message
            .clone()
            .or_else(|| self.policy.as_ref().and_then(|p| p.message()))
    }

    /// Push the current record state to the observer watch channel.
    pub fn publish_observed(&self) {
        self.state_tx.send_replace(Observed {
            state: self.record.state,
            message: self.message(),
            result: self.record.result.clone(),
        });
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            record: self.record.clone(),
            assimilated_by: self.assimilated_by.clone(),
            attempts_remaining: self.policy.as_ref().map(|p| p.attempts_remaining()),
            state_message: self.message(),
            state_durations: self.durations.clone(),
        }
    }

    /// Abort the in-flight attempt task, if any, and invalidate its
    /// completion.
    pub fn abort_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort.abort();
            self.attempt_seq = self.attempt_seq.wrapping_add(1);
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
