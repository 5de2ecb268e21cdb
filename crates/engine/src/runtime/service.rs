//! One service pass over one job.

use super::Engine;
use crate::handler::Scope;
use crate::job::DEFAULT_POLL_INTERVAL;
use anyhow::bail;
use drover_core::{Clock, DependencyFailureStrategy, JobId, JobState};
use std::time::Duration;

impl<C: Clock> Engine<C> {
    /// Service a job; any callback error faults it.
    pub(crate) async fn service_job(&mut self, id: &JobId) {
        if !self.registry.contains(id) {
            return;
        }
        if let Err(e) = self.service_pass(id).await {
            tracing::error!(job_id = %id, error = %e, "service pass error, faulting job");
            self.apply_transition(id, JobState::Faulted, Some(e.to_string())).await;
        }
    }

    /// One pass: enqueue, prepare, start, poll, reschedule.
    async fn service_pass(&mut self, id: &JobId) -> anyhow::Result<()> {
        if let Err(e) = self.ensure_policy(id) {
            bail!("failed to attach run policy: {e}");
        }
        let original = self.current_state(id);
        if original == Some(JobState::New) {
            self.pass_new(id).await?;
        }
        if matches!(self.current_state(id), Some(JobState::Wait) | Some(JobState::Ready)) {
            self.pass_prepare(id).await?;
        }
        if self.current_state(id) == Some(JobState::Ready) {
            self.pass_start(id).await?;
        }
        if self.current_state(id) == Some(JobState::Busy) {
            self.pass_busy(id).await?;
        }
        if let Some(state) = self.current_state(id) {
            if !state.is_terminal() {
                self.schedule_next_wake(id, state);
            }
        }
        Ok(())
    }

    /// First pass for a new job: collision check, edge validation, and
    /// `on_added`. Afterwards every other active job hears about it.
    async fn pass_new(&mut self, id: &JobId) -> anyhow::Result<()> {
        self.check_collisions(id).await;

        if self.current_state(id) == Some(JobState::New) {
            if self.registry.has_cycle_through(id) {
                bail!("pre-submission dependencies close a cycle");
            }
            let Some(entry) = self.registry.get(id) else { return Ok(()) };
            let handler = entry.handler.clone();
            let mut scope = Scope::new(self, id.clone());
            let state = handler.on_added(&mut scope)?;
            let state = match state {
                JobState::New => bail!("on_added returned new"),
                // A job cannot skip straight past preparation.
                JobState::Ready => JobState::Wait,
                state => state,
            };
            self.apply_transition(id, state, None).await;
        }

        // Publish the newcomer to the rest of the registry. Insertion order;
        // stop early if a callback drove the new job to a terminal state.
        if self.current_state(id).is_none_or(|s| s.is_terminal()) {
            return Ok(());
        }
        let Some(added) = self.record_for_callbacks(id) else { return Ok(()) };
        let others: Vec<JobId> = self
            .registry
            .iter()
            .filter(|(jid, entry)| {
                *jid != id && !entry.state().is_terminal() && entry.state() != JobState::New
            })
            .map(|(jid, _)| jid.clone())
            .collect();
        for other in others {
            let Some(entry) = self.registry.get(&other) else { continue };
            let handler = entry.handler.clone();
            let mut scope = Scope::new(self, other.clone());
            handler.on_new_job_added(&mut scope, &added);
            if self.current_state(id).is_none_or(|s| s.is_terminal()) {
                break;
            }
        }
        Ok(())
    }

    /// Decide Wait vs Ready (or fault) from dependencies, `on_prepare`, and
    /// the run policy.
    async fn pass_prepare(&mut self, id: &JobId) -> anyhow::Result<()> {
        let now = self.now_ms();
        let Some(entry) = self.registry.get(id) else { return Ok(()) };
        let handler = entry.handler.clone();
        let deps = entry.record.depends.snapshot();

        let mut forced: Option<JobState> = None;
        let mut fault_message: Option<String> = None;
        let mut blocked = false;
        for (dep_id, strategy) in deps {
            let Some(depended) = self.registry.get(&dep_id) else {
                // Evicted depended jobs were removable, hence satisfied.
                continue;
            };
            if depended.state() == JobState::Faulted {
                if strategy == DependencyFailureStrategy::CascadeFailure {
                    let state = handler.on_dependency_failed(&dep_id);
                    let state = if state == JobState::New { JobState::Faulted } else { state };
                    forced = Some(state);
                    fault_message = Some(format!("depended job {dep_id} faulted"));
                    break;
                }
                // IgnoreFailure: a faulted depended neither blocks nor fails
                // this job.
                continue;
            }
            if !depended.record.is_satisfied() {
                blocked = true;
            }
        }

        let state = match forced {
            Some(state) => state,
            None if blocked => JobState::Wait,
            None => {
                let mut scope = Scope::new(self, id.clone());
                match handler.on_prepare(&mut scope)? {
                    s @ (JobState::New | JobState::Busy) => bail!("on_prepare returned {s}"),
                    s => s,
                }
            }
        };

        let Some(entry) = self.registry.get_mut(id) else { return Ok(()) };
        let Some(policy) = entry.policy.as_mut() else { return Ok(()) };
        let state = if state == JobState::Ready && !policy.should_start(now) {
            JobState::Wait
        } else {
            state
        };
        let validated = policy.validate_requested_state(state, now);
        // Keep the gating/retry message visible while parked in Wait.
        if validated == JobState::Wait {
            entry.publish_observed();
        }
        self.apply_transition(id, validated, fault_message).await;
        Ok(())
    }

    /// Ready: open an attempt and hand the work callback to the pool.
    async fn pass_start(&mut self, id: &JobId) -> anyhow::Result<()> {
        let now = self.now_ms();
        let Some(entry) = self.registry.get_mut(id) else { return Ok(()) };
        entry.abort_worker();
        let Some(policy) = entry.policy.as_mut() else { return Ok(()) };
        policy.on_attempt_started(now);
        self.apply_transition(id, JobState::Busy, None).await;
        if self.current_state(id) == Some(JobState::Busy) {
            self.spawn_worker(id);
        }
        Ok(())
    }

    /// Busy: poll progress and enforce the attempt timeout.
    async fn pass_busy(&mut self, id: &JobId) -> anyhow::Result<()> {
        let Some(entry) = self.registry.get(id) else { return Ok(()) };
        let handler = entry.handler.clone();
        let state = handler.check_progress()?;
        if state == JobState::New {
            bail!("check_progress returned new");
        }

        let now = self.now_ms();
        let Some(entry) = self.registry.get_mut(id) else { return Ok(()) };
        let Some(policy) = entry.policy.as_mut() else { return Ok(()) };
        let deadline = policy.time_attempt_started_ms().saturating_add(policy.attempt_timeout_ms());
        if !state.is_terminal() && policy.attempt_in_progress() && now > deadline {
            entry.abort_worker();
            let Some(policy) = self.registry.get_mut(id).and_then(|e| e.policy.as_mut()) else {
                return Ok(());
            };
            let validated = policy.validate_requested_state(JobState::Ready, now);
            tracing::debug!(job_id = %id, "attempt timed out, recycling");
            self.apply_transition(id, validated, None).await;
        } else {
            let validated = policy.validate_requested_state(state, now);
            self.apply_transition(id, validated, None).await;
        }
        Ok(())
    }

    /// Compute when the loop should look at this job again.
    fn schedule_next_wake(&mut self, id: &JobId, state: JobState) {
        let now = self.now_ms();
        let Some(entry) = self.registry.get(id) else { return };
        let deps = entry.record.depends.snapshot();
        let (next_attempt, attempt_deadline) = match entry.policy.as_ref() {
            Some(p) => (
                p.time_of_next_attempt_ms(),
                p.time_attempt_started_ms().saturating_add(p.attempt_timeout_ms()),
            ),
            None => (0, u64::MAX),
        };

        let sleep_ms: Option<u64> = match state {
            JobState::Wait => {
                // Wake on depended completion where possible; poke depended
                // jobs that have not started yet.
                let mut armed = false;
                for (dep_id, _) in deps {
                    let Some(depended) = self.registry.get_mut(&dep_id) else { continue };
                    if depended.state().is_terminal() {
                        continue;
                    }
                    depended.notify_on_done.insert(id.clone());
                    armed = true;
                    if matches!(depended.state(), JobState::New | JobState::Ready) {
                        self.immediate.push_back(dep_id.clone());
                    }
                }
                if armed {
                    None
                } else {
                    let Some(entry) = self.registry.get_mut(id) else { return };
                    let poll = entry.poll.increment().as_millis() as u64;
                    Some(poll.max(next_attempt.saturating_sub(now)))
                }
            }
            JobState::Ready => Some(next_attempt.saturating_sub(now)),
            JobState::Busy => {
                let Some(entry) = self.registry.get_mut(id) else { return };
                let poll = entry.poll.increment().as_millis() as u64;
                Some(poll.min(attempt_deadline.saturating_sub(now)))
            }
            // New should not survive a pass; look again shortly.
            JobState::New => Some(0),
            _ => None,
        };

        if let Some(ms) = sleep_ms {
            let Some(entry) = self.registry.get_mut(id) else { return };
            entry.wake_seq = entry.wake_seq.wrapping_add(1);
            let delay = Duration::from_millis(ms).max(DEFAULT_POLL_INTERVAL);
            self.wake_requests.push((id.clone(), entry.wake_seq, delay));
        }
    }
}
