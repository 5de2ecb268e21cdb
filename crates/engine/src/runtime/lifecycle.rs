//! State transitions: guards, rollback, cascade propagation, cancellation.

use super::Engine;
use crate::error::EngineError;
use crate::handler::JobHandler;
use crate::observer::{StateUpdate, KEY_STATE_CHANGE};
use drover_core::{Clock, DependencyFailureStrategy, JobId, JobState};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(1);

type Pending = (JobId, JobState, Option<String>);

impl<C: Clock> Engine<C> {
    /// Apply a transition and drive any resulting cascade to completion.
    /// Returns the job's state after its own transition.
    pub(crate) async fn apply_transition(
        &mut self,
        id: &JobId,
        requested: JobState,
        message: Option<String>,
    ) -> JobState {
        let mut queue: VecDeque<Pending> = VecDeque::new();
        queue.push_back((id.clone(), requested, message));
        let mut primary = self.current_state(id).unwrap_or(requested);
        let mut first = true;
        while let Some((jid, new, msg)) = queue.pop_front() {
            let (result, cascades) = self.transition_one(&jid, new, msg).await;
            if first {
                primary = result;
                first = false;
            }
            queue.extend(cascades);
        }
        primary
    }

    /// One job's transition. Returns the resulting state plus cascade
    /// transitions to apply to dependents.
    async fn transition_one(
        &mut self,
        id: &JobId,
        new: JobState,
        message: Option<String>,
    ) -> (JobState, Vec<Pending>) {
        let now = self.now_ms();
        let Some(entry) = self.registry.get_mut(id) else {
            return (new, Vec::new());
        };
        let old = entry.state();

        // Guards: New is never a valid target; Canceled is fully absorbing;
        // other terminal states ignore everything except Faulted -> Canceled.
        if new == JobState::New || old == JobState::Canceled {
            return (old, Vec::new());
        }
        if old.is_terminal() && !(old == JobState::Faulted && new == JobState::Canceled) {
            return (old, Vec::new());
        }
        if old == new {
            return (old, Vec::new());
        }

        // A success without a result is a fault.
        let (new, message) = if new == JobState::Succeeded {
            match entry.handler.result() {
                Some(value) => {
                    entry.record.result = Some(value);
                    (new, message)
                }
                None => (JobState::Faulted, Some("produced no result".to_string())),
            }
        } else {
            (new, message)
        };

        entry.record.state = new;
        entry.record.state_message = message.or_else(|| {
            if new == JobState::Faulted {
                entry.policy.as_ref().and_then(|p| p.message())
            } else {
                None
            }
        });

        let elapsed = now.saturating_sub(entry.state_entered_ms);
        *entry.durations.entry(old).or_default() += Duration::from_millis(elapsed);
        entry.state_entered_ms = now;
        entry.poll.reset();

        // Work-loop shuffles are not persistable; everything else is.
        let persistable = !old.is_in_work_loop() || new.is_terminal();
        if persistable {
            entry.dirty = true;
            let _ = entry.updates_tx.send(StateUpdate {
                key: KEY_STATE_CHANGE.into(),
                state: new,
                message: entry.record.state_message.clone(),
            });
        }
        entry.publish_observed();

        let handler = entry.handler.clone();
        let need_rollback = old.is_in_work_loop() && new.is_failed();
        let mut to_service: Vec<JobId> = Vec::new();
        if new.is_terminal() {
            entry.abort_worker();
            to_service = entry.notify_on_done.drain(..).collect();
        }

        if new.is_terminal() {
            tracing::info!(job_id = %id, from = %old, to = %new, "job finished");
        } else {
            tracing::debug!(job_id = %id, from = %old, to = %new, "state transition");
        }

        handler.on_state_changed(old, new);
        if need_rollback {
            self.run_rollback(id, handler).await;
        }
        for dependent in to_service {
            self.immediate.push_back(dependent);
        }

        let mut cascades: Vec<Pending> = Vec::new();
        if new == JobState::Faulted {
            for (jid, dependent) in self.registry.iter() {
                if jid == id || dependent.state().is_terminal() {
                    continue;
                }
                if dependent.record.depends.mode(id)
                    != Some(DependencyFailureStrategy::CascadeFailure)
                {
                    continue;
                }
                let state = dependent.handler.on_dependency_failed(id);
                let state = if state == JobState::New { JobState::Faulted } else { state };
                cascades.push((
                    jid.clone(),
                    state,
                    Some(format!("depended job {id} faulted")),
                ));
            }
        }

        (new, cascades)
    }

    /// Run the handler's rollback on a worker, bounded to one second.
    async fn run_rollback(&mut self, id: &JobId, handler: Arc<dyn JobHandler>) {
        let task = tokio::spawn(async move { handler.rollback().await });
        match tokio::time::timeout(ROLLBACK_TIMEOUT, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(job_id = %id, error = %e, "rollback task failed"),
            Err(_) => tracing::warn!(job_id = %id, "rollback exceeded 1s, proceeding"),
        }
    }

    /// Idempotent cancel: abort the in-flight attempt and request a Canceled
    /// transition unless the job already succeeded.
    pub(crate) async fn cancel_job(&mut self, id: &JobId) {
        let Some(entry) = self.registry.get_mut(id) else { return };
        entry.abort_worker();
        if entry.state() != JobState::Succeeded {
            self.apply_transition(id, JobState::Canceled, None).await;
        }
    }

    /// Cross-task transition request, validated by the policy.
    pub(crate) async fn handle_request_state(
        &mut self,
        id: &JobId,
        state: JobState,
    ) -> Result<JobState, EngineError> {
        if state == JobState::New {
            return Err(EngineError::InvalidRequestedState(state));
        }
        if !self.registry.contains(id) {
            return Err(EngineError::NotFound(id.clone()));
        }
        self.ensure_policy(id)?;
        let now = self.now_ms();
        let Some(entry) = self.registry.get_mut(id) else {
            return Err(EngineError::NotFound(id.clone()));
        };
        if entry.state() == JobState::Canceled && state != JobState::Canceled {
            return Err(EngineError::JobCanceled(id.clone()));
        }
        let validated = match entry.policy.as_mut() {
            Some(policy) => policy.validate_requested_state(state, now),
            None => state,
        };
        let result = self.apply_transition(id, validated, None).await;
        self.immediate.push_back(id.clone());
        Ok(result)
    }
}
