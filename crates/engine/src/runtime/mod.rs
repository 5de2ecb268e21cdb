//! The service loop: one task owning the registry, serializing every state
//! transition, and driving per-job service passes.

mod collision;
mod lifecycle;
mod persist;
mod service;
mod worker;

pub(crate) use worker::WorkOutcome;

use crate::error::EngineError;
use crate::handler::{JobHandler, ScopeOps};
use crate::job::{Entry, Job, JobSnapshot};
use crate::observer::JobObserver;
use crate::registry::Registry;
use drover_core::{Clock, DependError, DependencyFailureStrategy, JobId, JobRecord, JobState};
use drover_storage::Persistor;
use smol_str::SmolStr;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::time::DelayQueue;

/// Rebuilds a handler from its persisted payload.
pub type HandlerFactory =
    Arc<dyn Fn(serde_json::Value) -> anyhow::Result<Arc<dyn JobHandler>> + Send + Sync>;

/// Requests served by the loop. Cross-task callers get oneshot replies
/// completed from the loop.
pub(crate) enum Command {
    Submit { job: Job, reply: oneshot::Sender<Result<JobObserver, EngineError>> },
    GetJob { id: JobId, reply: oneshot::Sender<Option<JobSnapshot>> },
    ListJobs { reply: oneshot::Sender<Vec<JobSnapshot>> },
    AddDependency {
        owner: JobId,
        target: JobId,
        strategy: DependencyFailureStrategy,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    RequestState {
        id: JobId,
        state: JobState,
        reply: oneshot::Sender<Result<JobState, EngineError>>,
    },
    Cancel { id: JobId, reply: Option<oneshot::Sender<()>> },
    WorkerDone { id: JobId, seq: u64, outcome: WorkOutcome },
    Clear { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

pub(crate) struct Engine<C: Clock> {
    pub registry: Registry,
    pub clock: C,
    pub persistor: Option<Box<dyn Persistor>>,
    pub kinds: HashMap<SmolStr, HandlerFactory>,
    pub worker_permits: Arc<Semaphore>,
    /// Loopback sender for worker completions and self-service requests.
    pub cmd_tx: mpsc::UnboundedSender<Command>,
    /// Jobs to service before the loop sleeps again.
    pub immediate: VecDeque<JobId>,
    /// Timed wakes to transfer into the delay queue.
    pub wake_requests: Vec<(JobId, u64, Duration)>,
    stopping: bool,
}

impl<C: Clock> Engine<C> {
    pub fn new(
        clock: C,
        persistor: Option<Box<dyn Persistor>>,
        kinds: HashMap<SmolStr, HandlerFactory>,
        worker_cap: usize,
        cmd_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            clock,
            persistor,
            kinds,
            worker_permits: Arc::new(Semaphore::new(worker_cap)),
            cmd_tx,
            immediate: VecDeque::new(),
            wake_requests: Vec::new(),
            stopping: false,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    pub fn current_state(&self, id: &JobId) -> Option<JobState> {
        self.registry.get(id).map(|e| e.state())
    }

    /// Attach the handler-configured run policy if the job does not have one
    /// yet. Fails when the handler returns a policy bound to another job.
    pub fn ensure_policy(&mut self, id: &JobId) -> Result<(), EngineError> {
        let Some(entry) = self.registry.get(id) else {
            return Err(EngineError::NotFound(id.clone()));
        };
        if entry.policy.is_some() {
            return Ok(());
        }
        let mut policy = entry.handler.configure_policy();
        policy.bind(id)?;
        policy.reset(self.now_ms());
        if let Some(entry) = self.registry.get_mut(id) {
            entry.record.time_job_started_ms = policy.time_job_started_ms();
            entry.policy = Some(policy);
        }
        Ok(())
    }

    /// Replay the persistor into the registry on first access.
    pub fn ensure_loaded(&mut self) {
        if self.registry.initialized {
            return;
        }
        self.registry.initialized = true;
        let Some(persistor) = &self.persistor else { return };
        let mut records = match persistor.list_jobs() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list persisted jobs");
                return;
            }
        };
        records.sort_by_key(|r| r.time_job_started_ms);
        let now = self.now_ms();
        let mut loaded = 0usize;
        for record in records {
            let id = record.id.clone();
            let Some(kind) = record.kind.clone() else {
                tracing::warn!(job_id = %id, "persisted record has no kind, skipping");
                continue;
            };
            let Some(factory) = self.kinds.get(&kind) else {
                tracing::warn!(job_id = %id, kind = %kind, "no handler factory registered, skipping");
                continue;
            };
            let handler = match factory(record.payload.clone()) {
                Ok(handler) => handler,
                Err(e) => {
                    tracing::warn!(job_id = %id, kind = %kind, error = %e, "handler factory failed, skipping");
                    continue;
                }
            };
            let record = record.normalized_for_reload();
            self.registry.insert(Entry::new(record, handler, now));
            self.immediate.push_back(id);
            loaded += 1;
        }
        if loaded > 0 {
            tracing::info!(count = loaded, "reloaded persisted jobs");
        }
    }

    fn handle_submit(&mut self, job: Job) -> Result<JobObserver, EngineError> {
        self.ensure_loaded();
        let Job { mut record, handler } = job;
        let id = record.id.clone();
        if self.registry.contains(&id) {
            return Err(EngineError::AlreadyRegistered(id));
        }

        // Pre-submission edges must target already-registered jobs; edges to
        // assimilated jobs follow the assimilator. Nothing is inserted until
        // every edge checks out, so a failed submit leaves the graph
        // unchanged.
        let mut rewritten = Vec::new();
        for (target, strategy) in record.depends.snapshot() {
            match self.registry.get(&target) {
                None => return Err(DependError::NotActive(target).into()),
                Some(entry) if entry.state() == JobState::Assimilated => {
                    let resolved = entry.assimilated_by.clone().unwrap_or(target.clone());
                    rewritten.push((target, resolved, strategy));
                }
                Some(_) => {}
            }
        }
        for (original, resolved, strategy) in rewritten {
            record.depends.remove(&original);
            if resolved != id && self.registry.contains(&resolved) {
                record.depends.insert(&id, resolved, strategy)?;
            }
        }

        record.time_job_started_ms = self.now_ms();
        let entry = Entry::new(record, handler, self.now_ms());
        let observer = JobObserver::new(
            id.clone(),
            entry.state_tx.subscribe(),
            entry.updates_tx.clone(),
            self.cmd_tx.clone(),
        );
        self.registry.insert(entry);
        tracing::info!(job_id = %id, "job submitted");
        self.immediate.push_back(id);
        Ok(observer)
    }

    /// Validated edge insertion with cycle rollback. Shared by `Scope`,
    /// collision handlers, and the manager API.
    pub(crate) fn add_dependency_impl(
        &mut self,
        owner: &JobId,
        target: &JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), DependError> {
        if owner == target {
            return Err(DependError::SelfDependency(target.clone()));
        }
        let resolved = match self.registry.get(target) {
            None => return Err(DependError::NotActive(target.clone())),
            Some(entry) if entry.state() == JobState::Assimilated => {
                entry.assimilated_by.clone().unwrap_or(target.clone())
            }
            Some(_) => target.clone(),
        };
        if resolved == *owner {
            return Err(DependError::SelfDependency(resolved));
        }
        if !self.registry.contains(&resolved) {
            return Err(DependError::NotActive(resolved));
        }
        let Some(entry) = self.registry.get_mut(owner) else {
            return Err(DependError::NotActive(owner.clone()));
        };
        let previous = entry.record.depends.mode(&resolved);
        entry.record.depends.insert(owner, resolved.clone(), strategy)?;
        if self.registry.has_cycle_through(owner) {
            if let Some(entry) = self.registry.get_mut(owner) {
                match previous {
                    Some(old) => {
                        let _ = entry.record.depends.insert(owner, resolved.clone(), old);
                    }
                    None => {
                        entry.record.depends.remove(&resolved);
                    }
                }
            }
            return Err(DependError::Cycle { from: owner.clone(), to: resolved });
        }
        Ok(())
    }

    async fn clear_all(&mut self) {
        let count = self.registry.len();
        for mut entry in self.registry.drain() {
            entry.abort_worker();
        }
        self.immediate.clear();
        self.wake_requests.clear();
        if let Some(persistor) = &self.persistor {
            if let Err(e) = persistor.clear() {
                tracing::warn!(error = %e, "failed to clear persistor");
            }
        }
        self.registry.initialized = false;
        tracing::info!(count, "cleared all jobs");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { job, reply } => {
                let _ = reply.send(self.handle_submit(job));
            }
            Command::GetJob { id, reply } => {
                self.ensure_loaded();
                let _ = reply.send(self.registry.get(&id).map(|e| e.snapshot()));
            }
            Command::ListJobs { reply } => {
                self.ensure_loaded();
                let _ = reply.send(self.registry.sorted_snapshots());
            }
            Command::AddDependency { owner, target, strategy, reply } => {
                self.ensure_loaded();
                let result = if self.registry.contains(&owner) {
                    self.add_dependency_impl(&owner, &target, strategy).map_err(Into::into)
                } else {
                    Err(EngineError::NotFound(owner))
                };
                let _ = reply.send(result);
            }
            Command::RequestState { id, state, reply } => {
                self.ensure_loaded();
                let result = self.handle_request_state(&id, state).await;
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                self.ensure_loaded();
                self.cancel_job(&id).await;
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Command::WorkerDone { id, seq, outcome } => {
                self.on_worker_done(&id, seq, outcome).await;
            }
            Command::Clear { reply } => {
                self.clear_all().await;
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.stopping = true;
                let _ = reply.send(());
            }
        }
    }

    async fn drain_immediate(&mut self) {
        while let Some(id) = self.immediate.pop_front() {
            self.service_job(&id).await;
        }
    }

    /// Refreshed record clone for collision/assimilation callbacks.
    pub(crate) fn record_for_callbacks(&self, id: &JobId) -> Option<JobRecord> {
        self.registry.get(id).map(|entry| {
            let mut record = entry.record.clone();
            record.payload = entry.handler.payload().unwrap_or(serde_json::Value::Null);
            record
        })
    }
}

impl<C: Clock> ScopeOps for Engine<C> {
    fn scope_add_dependency(
        &mut self,
        owner: &JobId,
        target: &JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), DependError> {
        self.add_dependency_impl(owner, target, strategy)
    }

    fn scope_remove_dependency(&mut self, owner: &JobId, target: &JobId) {
        if let Some(entry) = self.registry.get_mut(owner) {
            entry.record.depends.remove(target);
        }
    }

    fn scope_depending_mode(
        &self,
        owner: &JobId,
        target: &JobId,
    ) -> Option<DependencyFailureStrategy> {
        self.registry.get(owner).and_then(|e| e.record.depends.mode(target))
    }

    fn scope_record(&self, id: &JobId) -> Option<JobRecord> {
        self.registry.get(id).map(|e| e.record.clone())
    }

    fn scope_now_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Run the service loop until shutdown or until every manager handle drops.
pub(crate) async fn run<C: Clock>(mut engine: Engine<C>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut wakes: DelayQueue<(JobId, u64)> = DelayQueue::new();
    loop {
        for (id, seq, delay) in engine.wake_requests.drain(..) {
            wakes.insert((id, seq), delay);
        }
        tokio::select! {
            command = rx.recv() => {
                match command {
                    Some(command) => engine.handle_command(command).await,
                    None => break,
                }
            }
            Some(expired) = std::future::poll_fn(|cx| wakes.poll_expired(cx)) => {
                let (id, seq) = expired.into_inner();
                let current = engine.registry.get(&id).map(|e| e.wake_seq);
                if current == Some(seq) {
                    engine.service_job(&id).await;
                }
            }
        }
        engine.drain_immediate().await;
        engine.persist_pass().await;
        if engine.stopping {
            break;
        }
    }
    for mut entry in engine.registry.drain() {
        entry.abort_worker();
    }
}

#[cfg(test)]
#[path = "../runtime_tests/mod.rs"]
mod tests;
