//! `JobManager`: the public face of the runtime.

use crate::error::EngineError;
use crate::handler::JobHandler;
use crate::job::{Job, JobSnapshot};
use crate::observer::JobObserver;
use crate::runtime::{self, Command, Engine, HandlerFactory};
use drover_core::{Clock, DependencyFailureStrategy, JobId, JobState, SystemClock};
use drover_storage::Persistor;
use parking_lot::Mutex;
use smol_str::SmolStr;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Worker pool ceiling: roughly 3 * (1 + cores).
fn default_worker_cap() -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    3 * (1 + cores)
}

/// Owns the registry, the single-task service loop, and the bounded worker
/// pool. Cloneable handles are not provided; share it behind an `Arc` if
/// needed.
///
/// Must be created inside a tokio runtime.
pub struct JobManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl JobManager {
    /// In-memory manager with the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Durable manager backed by `persistor`.
    pub fn with_persistor(persistor: impl Persistor) -> Self {
        Self::builder().persistor(persistor).build()
    }

    pub fn builder() -> JobManagerBuilder<SystemClock> {
        JobManagerBuilder::new()
    }

    /// Bind `job` to this manager, register it, and schedule its first
    /// service pass. Fails when a pre-submission edge targets a job that is
    /// not registered here; the graph is left unchanged.
    pub async fn submit(&self, job: Job) -> Result<JobObserver, EngineError> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx.send(Command::Submit { job, reply }).map_err(|_| EngineError::Closed)?;
        response.await.map_err(|_| EngineError::Closed)?
    }

    /// Snapshot of one registered job.
    pub async fn get_job(&self, id: &JobId) -> Option<JobSnapshot> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx.send(Command::GetJob { id: id.clone(), reply }).ok()?;
        response.await.ok().flatten()
    }

    /// Snapshots of all registered jobs, ascending by start time.
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        let (reply, response) = oneshot::channel();
        if self.cmd_tx.send(Command::ListJobs { reply }).is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    /// Add a depends-on edge between two registered jobs.
    pub async fn add_dependency(
        &self,
        owner: &JobId,
        target: &JobId,
        strategy: DependencyFailureStrategy,
    ) -> Result<(), EngineError> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::AddDependency {
                owner: owner.clone(),
                target: target.clone(),
                strategy,
                reply,
            })
            .map_err(|_| EngineError::Closed)?;
        response.await.map_err(|_| EngineError::Closed)?
    }

    /// Request a policy-validated transition from outside the loop. Returns
    /// the state the job actually moved to.
    pub async fn request_state(
        &self,
        id: &JobId,
        state: JobState,
    ) -> Result<JobState, EngineError> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::RequestState { id: id.clone(), state, reply })
            .map_err(|_| EngineError::Closed)?;
        response.await.map_err(|_| EngineError::Closed)?
    }

    /// Cancel a job. Idempotent; unknown ids are ignored.
    pub async fn cancel(&self, id: &JobId) {
        let (reply, ack) = oneshot::channel();
        if self.cmd_tx.send(Command::Cancel { id: id.clone(), reply: Some(reply) }).is_ok() {
            let _ = ack.await;
        }
    }

    /// Drop all jobs and clear the persistor. Jobs are reloaded from the
    /// persistor on the next access.
    pub async fn clear(&self) {
        let (reply, ack) = oneshot::channel();
        if self.cmd_tx.send(Command::Clear { reply }).is_ok() {
            let _ = ack.await;
        }
    }

    /// Stop the service loop and wait for it to finish. In-flight workers
    /// are aborted.
    pub async fn shutdown(self) {
        let (reply, ack) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = ack.await;
        }
        let handle = self.join.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`JobManager`].
pub struct JobManagerBuilder<C: Clock> {
    clock: C,
    persistor: Option<Box<dyn Persistor>>,
    worker_cap: usize,
    kinds: HashMap<SmolStr, HandlerFactory>,
}

impl JobManagerBuilder<SystemClock> {
    pub fn new() -> Self {
        Self {
            clock: SystemClock,
            persistor: None,
            worker_cap: default_worker_cap(),
            kinds: HashMap::new(),
        }
    }
}

impl Default for JobManagerBuilder<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> JobManagerBuilder<C> {
    /// Swap the engine clock (tests).
    pub fn clock<C2: Clock>(self, clock: C2) -> JobManagerBuilder<C2> {
        JobManagerBuilder {
            clock,
            persistor: self.persistor,
            worker_cap: self.worker_cap,
            kinds: self.kinds,
        }
    }

    pub fn persistor(mut self, persistor: impl Persistor) -> Self {
        self.persistor = Some(Box::new(persistor));
        self
    }

    /// Override the worker pool ceiling.
    pub fn worker_cap(mut self, cap: usize) -> Self {
        self.worker_cap = cap.max(1);
        self
    }

    /// Register a factory that rebuilds `kind` handlers from their persisted
    /// payload on reload.
    pub fn register<F>(mut self, kind: &str, factory: F) -> Self
    where
        F: Fn(serde_json::Value) -> anyhow::Result<Arc<dyn JobHandler>> + Send + Sync + 'static,
    {
        self.kinds.insert(SmolStr::new(kind), Arc::new(factory));
        self
    }

    pub fn build(self) -> JobManager {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let engine =
            Engine::new(self.clock, self.persistor, self.kinds, self.worker_cap, cmd_tx.clone());
        let join = tokio::spawn(runtime::run(engine, cmd_rx));
        JobManager { cmd_tx, join: Mutex::new(Some(join)) }
    }
}
