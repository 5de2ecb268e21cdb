//! Persist pass: evict removable jobs, write dirty records.

use super::Engine;
use drover_core::{Clock, JobId};

impl<C: Clock> Engine<C> {
    /// Runs after every loop turn: evict removable jobs from registry and
    /// persistor, then write records whose last transition was persistable.
    pub(crate) async fn persist_pass(&mut self) {
        for id in self.registry.removable_ids() {
            if let Some(mut entry) = self.registry.remove(&id) {
                entry.abort_worker();
                tracing::info!(job_id = %id, state = %entry.state(), "evicting removable job");
                if let Some(persistor) = &self.persistor {
                    if entry.record.kind.is_some() {
                        if let Err(e) = persistor.remove_job(&id) {
                            tracing::warn!(job_id = %id, error = %e, "failed to remove persisted record");
                        }
                    }
                }
            }
        }

        let dirty: Vec<JobId> = self
            .registry
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(id, _)| id.clone())
            .collect();
        if dirty.is_empty() {
            return;
        }

        let mut failed: Vec<JobId> = Vec::new();
        for id in dirty {
            let Some(entry) = self.registry.get_mut(&id) else { continue };
            entry.dirty = false;
            if self.persistor.is_none() {
                continue;
            }
            if entry.record.kind.is_none() {
                tracing::warn!(job_id = %id, "job has no stable kind; not durably stored");
                continue;
            }
            entry.record.payload = entry.handler.payload().unwrap_or(serde_json::Value::Null);
            let record = entry.record.clone();
            if let Some(persistor) = &self.persistor {
                if let Err(e) = persistor.put_job(&record) {
                    tracing::warn!(job_id = %id, error = %e, "persist failed, canceling job");
                    failed.push(id.clone());
                }
            }
        }

        // Best-effort disposal of jobs the store rejected.
        for id in failed {
            self.cancel_job(&id).await;
            if let Some(persistor) = &self.persistor {
                let _ = persistor.remove_job(&id);
            }
        }
    }
}
