//! External handle on a submitted job: state waits, result reads, and
//! subscription callbacks.

use crate::error::EngineError;
use crate::runtime::Command;
use drover_core::{JobId, JobState};
use smol_str::SmolStr;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// Update key for state transitions. Other keys are reserved for future
/// progress streams.
pub const KEY_STATE_CHANGE: &str = "state-change";

/// Snapshot published to observers on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Observed {
    pub state: JobState,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// One element of the observer's update stream. Emitted for every
/// persistable transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub key: SmolStr,
    pub state: JobState,
    pub message: Option<String>,
}

/// Handle pinned to exactly one job. Returned by
/// [`crate::JobManager::submit`]; there is at most one per job.
#[derive(Debug)]
pub struct JobObserver {
    id: JobId,
    state_rx: watch::Receiver<Observed>,
    updates_tx: broadcast::Sender<StateUpdate>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl JobObserver {
    pub(crate) fn new(
        id: JobId,
        state_rx: watch::Receiver<Observed>,
        updates_tx: broadcast::Sender<StateUpdate>,
        cmd_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self { id, state_rx, updates_tx, cmd_tx }
    }

    pub fn job_id(&self) -> &JobId {
        &self.id
    }

    /// Current state, without waiting.
    pub fn state(&self) -> JobState {
        self.state_rx.borrow().state
    }

    /// Current state message, without waiting.
    pub fn state_message(&self) -> Option<String> {
        self.state_rx.borrow().message.clone()
    }

    /// The job's result, if it has succeeded.
    pub fn result(&self) -> Option<serde_json::Value> {
        self.state_rx.borrow().result.clone()
    }

    /// Wait until the job has been enqueued (left `New`). Returns the
    /// current state on timeout.
    pub async fn wait_until_added(&self, timeout: Duration) -> JobState {
        self.wait_for(timeout, |o| o.state != JobState::New).await.state
    }

    /// Wait until the job settles in a terminal state. Returns the current
    /// state on timeout.
    pub async fn wait_for_terminal_state(&self, timeout: Duration) -> JobState {
        self.wait_for(timeout, |o| o.state.is_terminal()).await.state
    }

    /// Wait for the job to finish, then read its result. `None` on timeout
    /// or on a resultless (failed) terminal state.
    pub async fn await_result(&self, timeout: Duration) -> Option<serde_json::Value> {
        self.wait_for(timeout, |o| o.state.is_terminal()).await.result
    }

    async fn wait_for(&self, timeout: Duration, cond: impl FnMut(&Observed) -> bool) -> Observed {
        let mut rx = self.state_rx.clone();
        let result = tokio::time::timeout(timeout, rx.wait_for(cond)).await;
        match result {
            Ok(Ok(observed)) => observed.clone(),
            // Timeout, or the job was evicted (sender dropped): report the
            // last published snapshot.
            _ => self.state_rx.borrow().clone(),
        }
    }

    /// Register a callback fired on every persistable transition. Dispatch
    /// happens on a spawned task; a slow callback can lose intermediate
    /// updates but never the ordering of the ones it sees.
    pub fn subscribe(&self, on_update: impl Fn(StateUpdate) + Send + 'static) {
        let mut rx = self.updates_tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => on_update(update),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "observer update stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Register a callback fired once when the job reaches a terminal state.
    pub fn subscribe_on_complete(&self, on_complete: impl FnOnce(Observed) + Send + 'static) {
        let mut rx = self.state_rx.clone();
        tokio::spawn(async move {
            let wait_result = rx.wait_for(|o| o.state.is_terminal()).await.map(|o| o.clone());
            let observed = match wait_result {
                Ok(observed) => observed,
                Err(_) => rx.borrow().clone(),
            };
            if observed.state.is_terminal() {
                on_complete(observed);
            }
        });
    }

    /// Cancel the observed job. Idempotent.
    pub async fn cancel(&self) {
        let (reply, ack) = tokio::sync::oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Cancel { id: self.id.clone(), reply: Some(reply) })
            .is_ok()
        {
            let _ = ack.await;
        }
    }

    /// Request a state transition for the observed job (the asynchronous
    /// completion path for handlers whose `do_work` returned `Busy`).
    pub async fn request_state(&self, state: JobState) -> Result<JobState, EngineError> {
        let (reply, response) = tokio::sync::oneshot::channel();
        self.cmd_tx
            .send(Command::RequestState { id: self.id.clone(), state, reply })
            .map_err(|_| EngineError::Closed)?;
        response.await.map_err(|_| EngineError::Closed)?
    }
}
