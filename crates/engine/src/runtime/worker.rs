//! Worker-pool execution of `do_work` and completion handling.

use super::{Command, Engine};
use crate::job::WorkerHandle;
use drover_core::{Clock, JobId, JobState};

/// What came back from a worker task.
#[derive(Debug)]
pub(crate) enum WorkOutcome {
    /// `do_work` returned a state to request.
    Requested(JobState),
    /// `do_work` returned an error or the task panicked.
    Failed(String),
    /// The task was aborted (cancel, attempt timeout, shutdown).
    Interrupted,
}

impl<C: Clock> Engine<C> {
    /// Spawn one attempt on the bounded pool. The permit is acquired inside
    /// the task so a saturated pool queues attempts without blocking the
    /// loop; aborting while queued releases nothing it never held.
    pub(crate) fn spawn_worker(&mut self, id: &JobId) {
        let Some(entry) = self.registry.get_mut(id) else { return };
        entry.attempt_seq = entry.attempt_seq.wrapping_add(1);
        let seq = entry.attempt_seq;
        let handler = entry.handler.clone();
        let permits = self.worker_permits.clone();
        let work = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Ok(JobState::Ready);
            };
            handler.do_work().await
        });
        entry.worker = Some(WorkerHandle { seq, abort: work.abort_handle() });

        let tx = self.cmd_tx.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            let outcome = match work.await {
                Ok(Ok(state)) => WorkOutcome::Requested(state),
                Ok(Err(e)) => WorkOutcome::Failed(e.to_string()),
                Err(e) if e.is_cancelled() => WorkOutcome::Interrupted,
                Err(e) => WorkOutcome::Failed(e.to_string()),
            };
            let _ = tx.send(Command::WorkerDone { id: job_id, seq, outcome });
        });
    }

    /// Apply a worker completion, validated against the policy. Stale
    /// completions (superseded attempt, job no longer busy) are logged and
    /// dropped.
    pub(crate) async fn on_worker_done(&mut self, id: &JobId, seq: u64, outcome: WorkOutcome) {
        let Some(entry) = self.registry.get_mut(id) else { return };
        if entry.worker.as_ref().map(|w| w.seq) != Some(seq) && entry.attempt_seq != seq {
            tracing::debug!(job_id = %id, seq, "stale worker completion dropped");
            return;
        }
        entry.worker = None;
        if entry.state() != JobState::Busy {
            tracing::info!(job_id = %id, state = %entry.state(), "worker finished but job is no longer busy");
            return;
        }

        let now = self.now_ms();
        let Some(policy) = self.registry.get_mut(id).and_then(|e| e.policy.as_mut()) else {
            return;
        };
        match outcome {
            // Asynchronous continuation: the attempt stays open and
            // `check_progress` keeps polling.
            WorkOutcome::Requested(JobState::Busy) => {}
            WorkOutcome::Requested(state) if state.is_terminal() => {
                let validated = policy.validate_requested_state(state, now);
                self.apply_transition(id, validated, None).await;
            }
            WorkOutcome::Requested(state) => {
                // The attempt ended without success; close it before the
                // requested state is applied, otherwise the job would sit on
                // an open attempt until the job timeout.
                let closed = if policy.attempt_in_progress() {
                    policy.on_attempt_failed(now)
                } else {
                    JobState::Wait
                };
                let target = if closed.is_terminal() {
                    closed
                } else {
                    let state = if state == JobState::New { JobState::Wait } else { state };
                    policy.validate_requested_state(state, now)
                };
                self.apply_transition(id, target, None).await;
            }
            WorkOutcome::Failed(message) => {
                tracing::error!(job_id = %id, error = %message, "work callback failed");
                self.apply_transition(id, JobState::Faulted, Some(message)).await;
            }
            WorkOutcome::Interrupted => {
                let validated = policy.validate_requested_state(JobState::Ready, now);
                tracing::debug!(job_id = %id, requested = %validated, "worker interrupted");
                self.apply_transition(id, validated, None).await;
            }
        }
        self.immediate.push_back(id.clone());
    }
}
