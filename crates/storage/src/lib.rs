// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-storage: durable job record stores.
//!
//! The engine depends only on the [`Persistor`] contract; the concrete
//! backends here are a JSON-file directory and an in-memory map.

mod json_dir;
mod memory;

pub use json_dir::JsonDirStore;
pub use memory::MemoryStore;

use drover_core::{JobId, JobRecord};
use thiserror::Error;

/// Errors raised by a persistor backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable storage contract for job records.
///
/// Implementations are called from the service loop; calls should be quick
/// and must be safe to repeat (the engine retries nothing but may re-put the
/// same record after restarts).
pub trait Persistor: Send + 'static {
    /// All stored records. Invoked once per manager initialization.
    fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Insert or replace the record for `record.id`.
    fn put_job(&self, record: &JobRecord) -> Result<(), StoreError>;

    /// Remove the record for `id`. Removing an absent id is not an error.
    fn remove_job(&self, id: &JobId) -> Result<(), StoreError>;

    /// Drop every stored record.
    fn clear(&self) -> Result<(), StoreError>;
}
