//! Collision detection between equal-key concurrency policies, and
//! assimilation of redundant jobs.

use super::Engine;
use drover_core::{Clock, ConcurrencyPolicy, DependencyFailureStrategy, JobId, JobState};

impl<C: Clock> Engine<C> {
    /// Run on a job's first service pass: scan the active set for an
    /// equal-key policy and resolve per variant. If the candidate ends up
    /// assimilated its enqueue path terminates.
    pub(crate) async fn check_collisions(&mut self, id: &JobId) {
        let now = self.now_ms();
        let Some(candidate) = self.registry.get(id) else { return };
        let Some(cand_conc) = candidate.policy.as_ref().and_then(|p| p.concurrency().cloned())
        else {
            return;
        };

        let others: Vec<JobId> =
            self.registry.iter().filter(|(jid, _)| *jid != id).map(|(jid, _)| jid.clone()).collect();

        for eid in others {
            let Some(existing) = self.registry.get(&eid) else { continue };
            if existing.state().is_terminal() {
                continue;
            }
            let Some(epolicy) = existing.policy.as_ref() else { continue };
            if epolicy.should_fail_job(now) {
                continue;
            }
            let Some(existing_conc) = epolicy.concurrency() else { continue };
            if !existing_conc.collides_with(&cand_conc) {
                continue;
            }
            let resolution = existing_conc.clone();
            tracing::info!(
                existing = %eid,
                candidate = %id,
                key = %resolution.key(),
                policy = %resolution,
                "concurrency collision"
            );

            match resolution {
                ConcurrencyPolicy::Fifo(_) => {
                    let already = self
                        .registry
                        .get(id)
                        .map(|e| e.record.depends.contains(&eid))
                        .unwrap_or(true);
                    if !already {
                        self.serialize_behind(id, &eid);
                    }
                }
                ConcurrencyPolicy::KeepExisting(_) => {
                    let absorbed = match (self.record_for_callbacks(id), self.registry.get(&eid)) {
                        (Some(cand_record), Some(existing)) => {
                            existing.handler.assimilate(&cand_record)
                        }
                        _ => false,
                    };
                    if absorbed {
                        self.assimilate(id, &eid).await;
                    } else {
                        self.serialize_behind(id, &eid);
                    }
                }
                ConcurrencyPolicy::ReplaceExisting(_) => {
                    let absorbed = match (self.record_for_callbacks(&eid), self.registry.get(id)) {
                        (Some(existing_record), Some(candidate)) => {
                            candidate.handler.assimilate(&existing_record)
                        }
                        _ => false,
                    };
                    if absorbed {
                        self.assimilate(&eid, id).await;
                    } else {
                        self.serialize_behind(&eid, id);
                    }
                }
            }

            let done = self
                .registry
                .get(id)
                .map(|e| e.assimilated_by.is_some() || e.state().is_terminal())
                .unwrap_or(true);
            if done {
                break;
            }
        }
    }

    /// `waiter` queues behind `head` without inheriting its failures.
    fn serialize_behind(&mut self, waiter: &JobId, head: &JobId) {
        if let Err(e) =
            self.add_dependency_impl(waiter, head, DependencyFailureStrategy::IgnoreFailure)
        {
            tracing::warn!(waiter = %waiter, head = %head, error = %e, "collision edge rejected");
        }
    }

    /// Move `target` to Assimilated with `by` as its assimilator, then
    /// rewrite every remaining edge pointing at `target` over to `by`.
    pub(crate) async fn assimilate(&mut self, target: &JobId, by: &JobId) {
        let Some(entry) = self.registry.get_mut(target) else { return };
        entry.assimilated_by = Some(by.clone());
        entry.abort_worker();
        self.apply_transition(target, JobState::Assimilated, Some(format!("assimilated by {by}")))
            .await;

        // Every J -> target edge becomes J -> by with the same strategy; an
        // edge from `by` itself is dropped rather than made a self-edge.
        for jid in self.registry.ids() {
            if jid == *target {
                continue;
            }
            let Some(entry) = self.registry.get_mut(&jid) else { continue };
            if let Some(strategy) = entry.record.depends.mode(target) {
                entry.record.depends.remove(target);
                if jid != *by {
                    let _ = entry.record.depends.insert(&jid, by.clone(), strategy);
                }
            }
        }

        let by_record = self.record_for_callbacks(by);
        let target_record = self.record_for_callbacks(target);
        if let (Some(by_record), Some(target_record)) = (by_record, target_record) {
            if let Some(entry) = self.registry.get(by) {
                entry.handler.on_job_assimilated(&by_record, &target_record);
            }
            if let Some(entry) = self.registry.get(target) {
                entry.handler.on_job_assimilated(&by_record, &target_record);
            }
        }
        tracing::info!(assimilated = %target, assimilator = %by, "job assimilated");
    }
}
