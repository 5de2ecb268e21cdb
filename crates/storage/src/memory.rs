//! In-memory store for tests and non-durable managers.

use crate::{Persistor, StoreError};
use drover_core::{JobId, JobRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// HashMap-backed store. Cloning shares the underlying map, which lets tests
/// hold a handle while the manager owns the persistor.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<JobId, JobRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.records.lock().get(id).cloned()
    }
}

impl Persistor for MemoryStore {
    fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.records.lock().values().cloned().collect())
    }

    fn put_job(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.records.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn remove_job(&self, id: &JobId) -> Result<(), StoreError> {
        self.records.lock().remove(id);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.records.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
