//! In-memory job store.
//!
//! Records live for the process lifetime and are never deleted; all
//! mutation goes through transition-checking methods so a terminal record
//! can never be touched again, regardless of how many tasks race on the
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use stillmotion_core::error::CoreError;
use stillmotion_core::job::{JobId, JobRecord, JobStatus};

/// Shared, concurrency-safe map of job records.
///
/// Cheap to clone; all clones see the same map.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `Pending` record and return its id.
    pub async fn create(&self, id: JobId) -> JobRecord {
        let record = JobRecord::new(id);
        self.inner.write().await.insert(id, record.clone());
        record
    }

    /// Snapshot of a record, or `NotFound`.
    pub async fn get(&self, id: JobId) -> Result<JobRecord, CoreError> {
        self.inner
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "Job",
                id: id.to_string(),
            })
    }

    /// Move a job to `Processing`.
    pub async fn mark_processing(&self, id: JobId) -> Result<(), CoreError> {
        self.mutate(id, |record| record.transition(JobStatus::Processing))
            .await
    }

    /// Move a job to `Completed` with its artifact path.
    pub async fn complete(&self, id: JobId, output_path: String) -> Result<(), CoreError> {
        self.mutate(id, |record| record.complete(output_path)).await
    }

    /// Move a job to `Failed` with an error message.
    pub async fn fail(&self, id: JobId, message: String) -> Result<(), CoreError> {
        self.mutate(id, |record| record.fail(message)).await
    }

    /// Update the coarse progress of a non-terminal job. Progress updates
    /// racing a terminal transition are dropped silently.
    pub async fn set_progress(&self, id: JobId, progress: u8) {
        let mut map = self.inner.write().await;
        if let Some(record) = map.get_mut(&id) {
            if !record.status.is_terminal() {
                record.progress = progress.min(100);
            }
        }
    }

    /// Number of records currently held (for diagnostics).
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    // ---- private helpers ----

    async fn mutate<F>(&self, id: JobId, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut JobRecord) -> Result<(), CoreError>,
    {
        let mut map = self.inner.write().await;
        let record = map.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        })?;
        f(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
