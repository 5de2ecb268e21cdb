//! The job registry: the single source of truth the service loop mutates.

use crate::job::Entry;
use drover_core::JobId;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Insertion-ordered map of live jobs, plus the lazy-init flag for persistor
/// reload.
pub(crate) struct Registry {
    entries: IndexMap<JobId, Entry>,
    /// False until the persistor has been replayed (or on a fresh manager,
    /// until first access). Reset by `clear`.
    pub initialized: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self { entries: IndexMap::new(), initialized: false }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &JobId) -> Option<&Entry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.record.id.clone(), entry);
    }

    pub fn remove(&mut self, id: &JobId) -> Option<Entry> {
        self.entries.shift_remove(id)
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JobId, &Entry)> {
        self.entries.iter()
    }

    pub fn drain(&mut self) -> Vec<Entry> {
        self.entries.drain(..).map(|(_, e)| e).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Does the depends-on graph, as it stands, contain a cycle through
    /// `start`?
    ///
    /// Depth-first walk over outgoing edges from `start`; a cycle exists iff
    /// some reachable node depends directly on `start`.
    pub fn has_cycle_through(&self, start: &JobId) -> bool {
        let mut visited: HashSet<JobId> = HashSet::new();
        let mut stack: Vec<JobId> = vec![start.clone()];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.entries.get(&id) else { continue };
            for (target, _) in entry.record.depends.iter() {
                if target == start {
                    return true;
                }
                if visited.insert(target.clone()) {
                    stack.push(target.clone());
                }
            }
        }
        false
    }

    /// Ids of jobs that may be evicted: terminal, and no registered
    /// non-removable job depends on them. Handlers may override their own
    /// verdict once terminal.
    ///
    /// Removability is judged against the in-memory registry only; a
    /// dependent existing solely in the persistor does not pin its depended
    /// job.
    pub fn removable_ids(&self) -> Vec<JobId> {
        let mut memo: HashMap<JobId, bool> = HashMap::new();
        let ids = self.ids();
        ids.into_iter().filter(|id| self.is_removable(id, &mut memo)).collect()
    }

    fn is_removable(&self, id: &JobId, memo: &mut HashMap<JobId, bool>) -> bool {
        if let Some(&answer) = memo.get(id) {
            return answer;
        }
        // Break dependent-chain walks defensively; the depends graph is
        // acyclic, so revisits only happen on diamonds.
        memo.insert(id.clone(), false);

        let Some(entry) = self.get(id) else {
            memo.insert(id.clone(), true);
            return true;
        };
        let answer = if !entry.state().is_terminal() {
            false
        } else if let Some(overridden) = entry.handler.is_removable() {
            overridden
        } else {
            self.dependent_ids(id).iter().all(|dep| self.is_removable(dep, memo))
        };
        memo.insert(id.clone(), answer);
        answer
    }

    /// Jobs holding an outgoing edge to `id`.
    pub fn dependent_ids(&self, id: &JobId) -> Vec<JobId> {
        self.entries
            .iter()
            .filter(|(jid, entry)| *jid != id && entry.record.depends.contains(id))
            .map(|(jid, _)| jid.clone())
            .collect()
    }

    /// Snapshots sorted ascending by policy start time.
    pub fn sorted_snapshots(&self) -> Vec<crate::job::JobSnapshot> {
        let mut snapshots: Vec<_> = self.entries.values().map(|e| e.snapshot()).collect();
        snapshots.sort_by_key(|s| s.record.time_job_started_ms);
        snapshots
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
