//! The per-job callback table and the scope handed to loop-side callbacks.
//!
//! `JobHandler` replaces an inheritance hierarchy: the engine owns every
//! lifecycle field, user code owns its payload and decides state by returning
//! it. Loop-side callbacks are synchronous and run on the service loop;
//! `do_work` and `rollback` run on the worker pool.

use async_trait::async_trait;
use drover_core::{DependError, DependencyFailureStrategy, JobId, JobRecord, JobState, RunPolicy};

/// User-supplied behavior for one job. Only `do_work` is mandatory.
///
/// Callback errors never escape the engine: they fault the job with the
/// error's display message. Returned states are validated against the run
/// policy before they are applied.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Stable type identifier for persistence. Handlers returning `None`
    /// stay memory-only (warned, not an error).
    fn kind(&self) -> Option<&'static str> {
        None
    }

    /// Serialized payload stored alongside the record. Re-materialized
    /// through the factory registered for [`Self::kind`].
    fn payload(&self) -> Option<serde_json::Value> {
        None
    }

    /// Called once when the job is first serviced. The returned policy must
    /// not already be bound to another job.
    fn configure_policy(&self) -> RunPolicy {
        RunPolicy::default()
    }

    /// Called once on the first service pass, after collision resolution.
    /// Returning `Ready` is coerced to `Wait`; returning `New` faults the
    /// job; a terminal state short-circuits the job.
    fn on_added(&self, _scope: &mut Scope<'_>) -> anyhow::Result<JobState> {
        Ok(JobState::Wait)
    }

    /// Called on every service pass while waiting: decide `Wait`, `Ready`,
    /// or a terminal state. Dependencies and the run policy can override the
    /// answer toward `Wait` or `Faulted`.
    fn on_prepare(&self, _scope: &mut Scope<'_>) -> anyhow::Result<JobState> {
        Ok(JobState::Ready)
    }

    /// One attempt of actual work, on the worker pool. Return `Succeeded`
    /// (with [`Self::result`] non-empty), `Ready`/`Wait` to retry under
    /// policy, `Busy` to keep the attempt open for an asynchronous
    /// completion, or a failed terminal state.
    async fn do_work(&self) -> anyhow::Result<JobState>;

    /// The work product. Must be non-empty by the time the job succeeds.
    fn result(&self) -> Option<serde_json::Value> {
        None
    }

    /// Polled while the job is `Busy`.
    fn check_progress(&self) -> anyhow::Result<JobState> {
        Ok(JobState::Busy)
    }

    fn on_state_changed(&self, _old: JobState, _new: JobState) {}

    /// Another job was registered while this one is active.
    fn on_new_job_added(&self, _scope: &mut Scope<'_>, _added: &JobRecord) {}

    /// This job was party to an assimilation (as either side).
    fn on_job_assimilated(&self, _assimilator: &JobRecord, _assimilated: &JobRecord) {}

    /// A depended job faulted across a cascade edge. The returned state is
    /// applied to this job; the default propagates the fault.
    fn on_dependency_failed(&self, _depended: &JobId) -> JobState {
        JobState::Faulted
    }

    /// Invoked on the worker pool when the job leaves the work loop into a
    /// failed state. Awaited for at most one second.
    async fn rollback(&self) {}

    /// Absorb a redundant colliding job's work. Return true when the merge
    /// happened; the redundant job is then assimilated.
    fn assimilate(&self, _redundant: &JobRecord) -> bool {
        false
    }

    /// Override removability. `None` applies the default rule: terminal and
    /// no non-removable dependent. Consulted only for terminal jobs.
    fn is_removable(&self) -> Option<bool> {
        None
    }
}

/// Engine operations available to loop-side callbacks.
///
/// Object-safe view over the engine so `JobHandler` stays clock-agnostic.
pub(crate) trait ScopeOps: Send {
    fn scope_add_dependency(
        &mut self,
        owner: &JobId,
        target: &JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), DependError>;
    fn scope_remove_dependency(&mut self, owner: &JobId, target: &JobId);
    fn scope_depending_mode(
        &self,
        owner: &JobId,
        target: &JobId,
    ) -> Option<DependencyFailureStrategy>;
    fn scope_record(&self, id: &JobId) -> Option<JobRecord>;
    fn scope_now_ms(&self) -> u64;
}

/// Handed to callbacks that run on the service loop. All operations act on
/// behalf of the callback's own job and are applied synchronously.
pub struct Scope<'a> {
    ops: &'a mut dyn ScopeOps,
    id: JobId,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(ops: &'a mut dyn ScopeOps, id: JobId) -> Self {
        Self { ops, id }
    }

    /// The id of the job this callback belongs to.
    pub fn job_id(&self) -> &JobId {
        &self.id
    }

    /// Current epoch milliseconds from the engine clock.
    pub fn now_ms(&self) -> u64 {
        self.ops.scope_now_ms()
    }

    /// Add a depends-on edge from this job to `target`.
    ///
    /// Fails on self-edges, on targets not active in this manager, and on
    /// edges that would close a cycle (the edge is rolled back). An edge to
    /// an assimilated job is rewritten to its assimilator.
    pub fn add_dependency(
        &mut self,
        target: &JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), DependError> {
        let id = self.id.clone();
        self.ops.scope_add_dependency(&id, target, strategy)
    }

    /// Remove this job's edge to `target`, if any.
    pub fn remove_dependency(&mut self, target: &JobId) {
        let id = self.id.clone();
        self.ops.scope_remove_dependency(&id, target);
    }

    /// The strategy of this job's edge to `target`, if one exists.
    pub fn depending_mode(&self, target: &JobId) -> Option<DependencyFailureStrategy> {
        self.ops.scope_depending_mode(&self.id, target)
    }

    /// Snapshot of another registered job.
    pub fn get_job(&self, id: &JobId) -> Option<JobRecord> {
        self.ops.scope_record(id)
    }
}
