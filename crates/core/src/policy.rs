//! Per-job run policy: attempts, timeouts, retry delays, gating, and
//! concurrency identity.
//!
//! The policy is a pure value machine over epoch-millisecond timestamps; the
//! service loop feeds it `now` and applies the states it returns. It never
//! schedules anything itself.

use crate::concurrency::ConcurrencyPolicy;
use crate::error::PolicyError;
use crate::gate::GatingCondition;
use crate::id::JobId;
use crate::state::JobState;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_JOB_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;
const DEADLINE_PRESET_ATTEMPTS: u32 = 50;
const BACKOFF_DEFAULT_MAX_MS: u64 = 30_000;

/// Message attached when the retry budget is exhausted.
pub const MSG_NO_MORE_RETRIES: &str = "no more retries";
/// Message attached when the job's age deadline passes.
pub const MSG_TIMED_OUT: &str = "timed out";

/// Governs when a job may attempt work and when it must fail.
#[derive(Clone)]
pub struct RunPolicy {
    max_attempts: u32,
    attempts_remaining: u32,
    job_timeout_ms: u64,
    attempt_timeout_ms: u64,
    /// Current delay before the next attempt after a failure. Doubles when
    /// backoff is active.
    retry_delay_ms: u64,
    /// Backoff ceiling; 0 means the delay is static.
    retry_delay_max_ms: u64,
    initial_delay_ms: u64,
    time_job_started_ms: u64,
    /// 0 when no attempt is in progress.
    time_attempt_started_ms: u64,
    time_of_next_attempt_ms: u64,
    state_message: Option<String>,
    concurrency: Option<ConcurrencyPolicy>,
    gates: Vec<Arc<dyn GatingCondition>>,
    job_id: Option<JobId>,
}

impl std::fmt::Debug for RunPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("attempts_remaining", &self.attempts_remaining)
            .field("job_timeout_ms", &self.job_timeout_ms)
            .field("attempt_timeout_ms", &self.attempt_timeout_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("retry_delay_max_ms", &self.retry_delay_max_ms)
            .field("time_of_next_attempt_ms", &self.time_of_next_attempt_ms)
            .field("gates", &self.gates.len())
            .field("concurrency", &self.concurrency)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        RunPolicyBuilder::default().build()
    }
}

impl RunPolicy {
    pub fn builder() -> RunPolicyBuilder {
        RunPolicyBuilder::default()
    }

    /// Deadline preset: a generous attempt budget bounded by the job timeout.
    pub fn with_job_timeout(timeout: Duration) -> Self {
        Self::builder().max_attempts(DEADLINE_PRESET_ATTEMPTS).job_timeout(timeout).build()
    }

    /// Builder initialized from a deep copy of this policy. `build()` yields
    /// a reset, unbound, independent policy.
    pub fn build_upon(&self) -> RunPolicyBuilder {
        RunPolicyBuilder {
            max_attempts: self.max_attempts,
            job_timeout_ms: self.job_timeout_ms,
            attempt_timeout_ms: self.attempt_timeout_ms,
            retry_delay_ms: self.retry_delay_ms,
            retry_delay_max_ms: self.retry_delay_max_ms,
            initial_delay_ms: self.initial_delay_ms,
            concurrency: self.concurrency.clone(),
            gates: self.gates.clone(),
        }
    }

    /// Bind this policy to a job identity. Binding is one-shot: re-binding to
    /// a different id fails.
    pub fn bind(&mut self, id: &JobId) -> Result<(), PolicyError> {
        match &self.job_id {
            Some(bound) if bound != id => Err(PolicyError::AlreadyBound {
                bound: bound.clone(),
                requested: id.clone(),
            }),
            _ => {
                self.job_id = Some(id.clone());
                Ok(())
            }
        }
    }

    pub fn bound_to(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    // -- accessors --

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    pub fn concurrency(&self) -> Option<&ConcurrencyPolicy> {
        self.concurrency.as_ref()
    }

    pub fn time_job_started_ms(&self) -> u64 {
        self.time_job_started_ms
    }

    pub fn time_attempt_started_ms(&self) -> u64 {
        self.time_attempt_started_ms
    }

    pub fn time_of_next_attempt_ms(&self) -> u64 {
        self.time_of_next_attempt_ms
    }

    pub fn attempt_timeout_ms(&self) -> u64 {
        self.attempt_timeout_ms
    }

    pub fn attempt_in_progress(&self) -> bool {
        self.time_attempt_started_ms != 0
    }

    /// The job's age deadline has passed.
    pub fn timed_out(&self, now_ms: u64) -> bool {
        now_ms >= self.time_job_started_ms + self.job_timeout_ms
    }

    /// Terminal message, or the first unsatisfied gate's message.
    pub fn message(&self) -> Option<String> {
        if self.state_message.is_some() {
            return self.state_message.clone();
        }
        self.gates.iter().find(|g| !g.is_satisfied()).map(|g| g.message())
    }

    // -- attempt bookkeeping --

    /// Record an attempt start. No guard: the caller has already decided.
    pub fn on_attempt_started(&mut self, now_ms: u64) {
        self.time_attempt_started_ms = now_ms;
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
    }

    /// Record an attempt failure and decide where the job goes next.
    pub fn on_attempt_failed(&mut self, now_ms: u64) -> JobState {
        self.time_attempt_started_ms = 0;
        self.time_of_next_attempt_ms = now_ms + self.retry_delay_ms;
        if self.retry_delay_max_ms > 0 {
            self.retry_delay_ms = (self.retry_delay_ms * 2).min(self.retry_delay_max_ms);
        }
        if self.time_of_next_attempt_ms > self.time_job_started_ms + self.job_timeout_ms {
            self.state_message = Some(MSG_TIMED_OUT.to_string());
            return JobState::Faulted;
        }
        if self.attempts_remaining == 0 {
            self.state_message = Some(MSG_NO_MORE_RETRIES.to_string());
            return JobState::Faulted;
        }
        self.state_message = None;
        JobState::Wait
    }

    /// May a new attempt begin right now?
    pub fn should_start(&self, now_ms: u64) -> bool {
        if self.attempt_in_progress() {
            return false;
        }
        if self.attempts_remaining == 0 {
            return false;
        }
        if now_ms < self.time_of_next_attempt_ms {
            return false;
        }
        if self.timed_out(now_ms) {
            return false;
        }
        self.gates.iter().all(|g| g.is_satisfied())
    }

    /// The in-flight (or stale) attempt should be declared failed.
    ///
    /// Always false before any attempt has been made.
    pub fn should_fail_attempt(&self, now_ms: u64) -> bool {
        if self.attempts_remaining == self.max_attempts {
            return false;
        }
        self.timed_out(now_ms)
            || !self.attempt_in_progress()
            || now_ms.saturating_sub(self.time_attempt_started_ms) > self.attempt_timeout_ms
    }

    /// The whole job should be declared failed.
    pub fn should_fail_job(&self, now_ms: u64) -> bool {
        if self.timed_out(now_ms) {
            return true;
        }
        (!self.attempt_in_progress() || self.should_fail_attempt(now_ms))
            && self.attempts_remaining == 0
    }

    /// Reconcile a requested state with what the policy allows.
    pub fn validate_requested_state(&mut self, requested: JobState, now_ms: u64) -> JobState {
        if requested.is_terminal() {
            return requested;
        }
        if self.should_fail_job(now_ms) {
            self.state_message = Some(if self.timed_out(now_ms) {
                MSG_TIMED_OUT.to_string()
            } else {
                MSG_NO_MORE_RETRIES.to_string()
            });
            return JobState::Faulted;
        }
        if requested == JobState::Ready && self.attempt_in_progress() {
            // An attempt is still open; a Ready request means it ended
            // without success.
            return self.on_attempt_failed(now_ms);
        }
        if requested == JobState::Ready && self.time_of_next_attempt_ms > now_ms {
            return JobState::Wait;
        }
        if requested == JobState::Busy
            && self.attempt_in_progress()
            && self.should_fail_attempt(now_ms)
        {
            return self.on_attempt_failed(now_ms);
        }
        requested
    }

    /// Make the next attempt eligible immediately.
    pub fn schedule_now(&mut self) {
        self.time_of_next_attempt_ms = 0;
    }

    /// Restore the full attempt budget and restart the policy clock.
    pub fn reset(&mut self, now_ms: u64) {
        self.attempts_remaining = self.max_attempts;
        self.time_job_started_ms = now_ms;
        self.time_attempt_started_ms = 0;
        self.time_of_next_attempt_ms = now_ms + self.initial_delay_ms;
        self.state_message = None;
    }
}

/// Builder for [`RunPolicy`].
///
/// Defaults: 5 attempts, 24 h job timeout, 24 h attempt timeout, 5 s static
/// retry delay, no initial delay, no gating, no concurrency.
#[derive(Clone)]
pub struct RunPolicyBuilder {
    max_attempts: u32,
    job_timeout_ms: u64,
    attempt_timeout_ms: u64,
    retry_delay_ms: u64,
    retry_delay_max_ms: u64,
    initial_delay_ms: u64,
    concurrency: Option<ConcurrencyPolicy>,
    gates: Vec<Arc<dyn GatingCondition>>,
}

impl Default for RunPolicyBuilder {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            job_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            retry_delay_max_ms: 0,
            initial_delay_ms: 0,
            concurrency: None,
            gates: Vec::new(),
        }
    }
}

impl RunPolicyBuilder {
    /// Total attempt budget. Clamped to at least one.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Static delay between a failed attempt and the next one. Disables
    /// backoff.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self.retry_delay_max_ms = 0;
        self
    }

    /// Exponential backoff with a randomized 500–1500 ms seed and a 30 s cap.
    pub fn exponential_backoff(self) -> Self {
        let seed = rand::rng().random_range(500..=1500);
        self.exponential_backoff_of(
            Duration::from_millis(seed),
            Duration::from_millis(BACKOFF_DEFAULT_MAX_MS),
        )
    }

    /// Exponential backoff: `initial` delay doubling up to `max`.
    pub fn exponential_backoff_of(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_delay_ms = initial.as_millis() as u64;
        self.retry_delay_max_ms = (max.as_millis() as u64).max(1);
        self
    }

    /// Delay before the very first attempt is eligible.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Add a gating condition. All registered gates must be satisfied before
    /// an attempt may start.
    pub fn gating_condition(mut self, gate: impl GatingCondition) -> Self {
        self.gates.push(Arc::new(gate));
        self
    }

    /// As [`Self::gating_condition`], for an already-shared gate.
    pub fn gating_condition_arc(mut self, gate: Arc<dyn GatingCondition>) -> Self {
        self.gates.push(gate);
        self
    }

    /// Concurrency identity. At most one; the last call wins.
    pub fn concurrency_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrency = Some(policy);
        self
    }

    pub fn build(self) -> RunPolicy {
        let mut policy = RunPolicy {
            max_attempts: self.max_attempts,
            attempts_remaining: self.max_attempts,
            job_timeout_ms: self.job_timeout_ms,
            attempt_timeout_ms: self.attempt_timeout_ms,
            retry_delay_ms: self.retry_delay_ms,
            retry_delay_max_ms: self.retry_delay_max_ms,
            initial_delay_ms: self.initial_delay_ms,
            time_job_started_ms: 0,
            time_attempt_started_ms: 0,
            time_of_next_attempt_ms: 0,
            state_message: None,
            concurrency: self.concurrency,
            gates: self.gates,
            job_id: None,
        };
        policy.reset(crate::clock::epoch_ms_now());
        policy
    }

    /// As [`Self::build`], with an explicit clock origin (tests).
    pub fn build_at(self, now_ms: u64) -> RunPolicy {
        let mut policy = self.build();
        policy.reset(now_ms);
        policy
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
