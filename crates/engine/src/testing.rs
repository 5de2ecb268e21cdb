//! Test support: a scriptable handler and a tokio-time-backed clock.
//!
//! `TestJob` is a callbacks table (each hook is an optional closure) so
//! tests can exercise any engine path without declaring a struct per case.

use crate::handler::{JobHandler, Scope};
use async_trait::async_trait;
use drover_core::{Clock, JobId, JobRecord, JobState, RunPolicy};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;

/// Clock derived from `tokio::time`, so paused-time tests advance the policy
/// clock and the delay queue in lockstep.
#[derive(Clone)]
pub struct TokioClock {
    start: tokio::time::Instant,
    origin_ms: u64,
}

impl TokioClock {
    /// Must be created inside a tokio runtime.
    pub fn new() -> Self {
        Self { start: tokio::time::Instant::now(), origin_ms: 1_000_000 }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn epoch_ms(&self) -> u64 {
        self.origin_ms + self.start.elapsed().as_millis() as u64
    }
}

type WorkFuture = Pin<Box<dyn Future<Output = anyhow::Result<JobState>> + Send>>;
type WorkFn = Box<dyn Fn() -> WorkFuture + Send + Sync>;
type StateFn = Box<dyn Fn(&mut Scope<'_>) -> anyhow::Result<JobState> + Send + Sync>;
type ProgressFn = Box<dyn Fn() -> anyhow::Result<JobState> + Send + Sync>;
type NewJobFn = Box<dyn Fn(&mut Scope<'_>, &JobRecord) + Send + Sync>;
type AssimilateFn = Box<dyn Fn(&JobRecord) -> bool + Send + Sync>;
type DependencyFailedFn = Box<dyn Fn(&JobId) -> JobState + Send + Sync>;
type RollbackFn = Box<dyn Fn() + Send + Sync>;
type StateChangedFn = Box<dyn Fn(JobState, JobState) + Send + Sync>;

/// Scriptable [`JobHandler`].
pub struct TestJob {
    kind: Option<&'static str>,
    policy: Mutex<Option<RunPolicy>>,
    work: WorkFn,
    result: Mutex<Option<serde_json::Value>>,
    payload: Option<serde_json::Value>,
    on_added: Option<StateFn>,
    on_prepare: Option<StateFn>,
    check_progress: Option<ProgressFn>,
    on_new_job_added: Option<NewJobFn>,
    on_dependency_failed: Option<DependencyFailedFn>,
    assimilate: Option<AssimilateFn>,
    rollback: Option<RollbackFn>,
    on_state_changed: Option<StateChangedFn>,
    removable: Option<bool>,
}

impl TestJob {
    /// A job that immediately succeeds with the given result.
    pub fn succeeding(result: impl Into<serde_json::Value>) -> TestJobBuilder {
        let value = result.into();
        TestJobBuilder::new()
            .work(|| async { Ok(JobState::Succeeded) })
            .result(value)
    }

    pub fn builder() -> TestJobBuilder {
        TestJobBuilder::new()
    }

    /// Set or replace the result the handler exposes.
    pub fn set_result(&self, value: impl Into<serde_json::Value>) {
        *self.result.lock() = Some(value.into());
    }
}

#[async_trait]
impl JobHandler for TestJob {
    fn kind(&self) -> Option<&'static str> {
        self.kind
    }

    fn payload(&self) -> Option<serde_json::Value> {
        self.payload.clone()
    }

    fn configure_policy(&self) -> RunPolicy {
        self.policy.lock().take().unwrap_or_default()
    }

    fn on_added(&self, scope: &mut Scope<'_>) -> anyhow::Result<JobState> {
        match &self.on_added {
            Some(hook) => hook(scope),
            None => Ok(JobState::Wait),
        }
    }

    fn on_prepare(&self, scope: &mut Scope<'_>) -> anyhow::Result<JobState> {
        match &self.on_prepare {
            Some(hook) => hook(scope),
            None => Ok(JobState::Ready),
        }
    }

    async fn do_work(&self) -> anyhow::Result<JobState> {
        (self.work)().await
    }

    fn result(&self) -> Option<serde_json::Value> {
        self.result.lock().clone()
    }

    fn check_progress(&self) -> anyhow::Result<JobState> {
        match &self.check_progress {
            Some(hook) => hook(),
            None => Ok(JobState::Busy),
        }
    }

    fn on_state_changed(&self, old: JobState, new: JobState) {
        if let Some(hook) = &self.on_state_changed {
            hook(old, new);
        }
    }

    fn on_new_job_added(&self, scope: &mut Scope<'_>, added: &JobRecord) {
        if let Some(hook) = &self.on_new_job_added {
            hook(scope, added);
        }
    }

    fn on_dependency_failed(&self, depended: &JobId) -> JobState {
        match &self.on_dependency_failed {
            Some(hook) => hook(depended),
            None => JobState::Faulted,
        }
    }

    async fn rollback(&self) {
        if let Some(hook) = &self.rollback {
            hook();
        }
    }

    fn assimilate(&self, redundant: &JobRecord) -> bool {
        match &self.assimilate {
            Some(hook) => hook(redundant),
            None => false,
        }
    }

    fn is_removable(&self) -> Option<bool> {
        self.removable
    }
}

/// Builder for [`TestJob`].
pub struct TestJobBuilder {
    job: TestJob,
}

impl TestJobBuilder {
    fn new() -> Self {
        Self {
            job: TestJob {
                kind: None,
                policy: Mutex::new(None),
                work: Box::new(|| Box::pin(async { Ok(JobState::Succeeded) })),
                result: Mutex::new(Some(serde_json::Value::String("done".into()))),
                payload: None,
                on_added: None,
                on_prepare: None,
                check_progress: None,
                on_new_job_added: None,
                on_dependency_failed: None,
                assimilate: None,
                rollback: None,
                on_state_changed: None,
                removable: None,
            },
        }
    }

    pub fn kind(mut self, kind: &'static str) -> Self {
        self.job.kind = Some(kind);
        self
    }

    pub fn policy(mut self, policy: RunPolicy) -> Self {
        self.job.policy = Mutex::new(Some(policy));
        self
    }

    pub fn work<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<JobState>> + Send + 'static,
    {
        self.job.work = Box::new(move || Box::pin(work()));
        self
    }

    pub fn result(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.job.result = Mutex::new(Some(value.into()));
        self
    }

    pub fn no_result(mut self) -> Self {
        self.job.result = Mutex::new(None);
        self
    }

    pub fn payload(mut self, value: serde_json::Value) -> Self {
        self.job.payload = Some(value);
        self
    }

    pub fn on_added<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Scope<'_>) -> anyhow::Result<JobState> + Send + Sync + 'static,
    {
        self.job.on_added = Some(Box::new(hook));
        self
    }

    pub fn on_prepare<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Scope<'_>) -> anyhow::Result<JobState> + Send + Sync + 'static,
    {
        self.job.on_prepare = Some(Box::new(hook));
        self
    }

    pub fn check_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<JobState> + Send + Sync + 'static,
    {
        self.job.check_progress = Some(Box::new(hook));
        self
    }

    pub fn on_new_job_added<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Scope<'_>, &JobRecord) + Send + Sync + 'static,
    {
        self.job.on_new_job_added = Some(Box::new(hook));
        self
    }

    pub fn on_dependency_failed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobId) -> JobState + Send + Sync + 'static,
    {
        self.job.on_dependency_failed = Some(Box::new(hook));
        self
    }

    pub fn assimilate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobRecord) -> bool + Send + Sync + 'static,
    {
        self.job.assimilate = Some(Box::new(hook));
        self
    }

    pub fn rollback<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.job.rollback = Some(Box::new(hook));
        self
    }

    pub fn on_state_changed<F>(mut self, hook: F) -> Self
    where
        F: Fn(JobState, JobState) + Send + Sync + 'static,
    {
        self.job.on_state_changed = Some(Box::new(hook));
        self
    }

    pub fn removable(mut self, removable: bool) -> Self {
        self.job.removable = Some(removable);
        self
    }

    pub fn build(self) -> TestJob {
        self.job
    }
}
