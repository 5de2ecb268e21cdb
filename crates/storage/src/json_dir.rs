//! One JSON file per job record in a directory.

use crate::{Persistor, StoreError};
use drover_core::{JobId, JobRecord};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory-backed store: `<dir>/<job-id>.json` per record.
///
/// Listing tolerates unreadable or foreign files: they are logged and
/// skipped, never fatal. Writes go through a temp file + rename so a crash
/// mid-write cannot corrupt an existing record.
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl Persistor for JsonDirStore {
    fn list_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = match fs::read_to_string(&path) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            match serde_json::from_str::<JobRecord>(&data) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt record");
                }
            }
        }
        Ok(records)
    }

    fn put_job(&self, record: &JobRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(record)?;
        let path = self.record_path(&record.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_job(&self, id: &JobId) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove record");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "json_dir_tests.rs"]
mod tests;
