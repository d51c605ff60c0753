//! Job runner: one bounded task per submitted job.
//!
//! Concurrency is capped by a semaphore sized to the device budget
//! (default 1 -- the diffusion device cannot be parallelized); jobs beyond
//! the cap wait in `Pending` order. Every job carries a deadline and
//! honors the runner-wide cancellation token, and its scratch directory is
//! deleted once the job reaches a terminal state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use stillmotion_core::job::JobId;
use stillmotion_core::naming;
use stillmotion_core::params::GenerationParams;
use stillmotion_pipeline::ModelService;

use crate::store::JobStore;

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum simultaneous generation tasks.
    pub max_concurrent_jobs: usize,
    /// Per-job deadline covering the whole generate call.
    pub job_timeout: Duration,
    /// Persistent directory for finished videos (survives scratch cleanup).
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(600),
            output_dir: PathBuf::from("storage/outputs"),
        }
    }
}

/// Spawns and supervises generation tasks.
pub struct JobRunner {
    store: JobStore,
    service: Arc<ModelService>,
    semaphore: Arc<Semaphore>,
    config: RunnerConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl JobRunner {
    pub fn new(store: JobStore, service: Arc<ModelService>, config: RunnerConfig) -> Self {
        Self {
            store,
            service,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            config,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn the task for a submitted job.
    ///
    /// `scratch` holds the uploaded image; it is dropped (deleted) when the
    /// job reaches a terminal state. Returns immediately.
    pub fn spawn(
        &self,
        id: JobId,
        scratch: TempDir,
        image_path: PathBuf,
        params: GenerationParams,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let service = Arc::clone(&self.service);
        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        let job_timeout = self.config.job_timeout;
        let output_path = self.config.output_dir.join(naming::job_output_name(id));

        self.tracker.spawn(async move {
            // Hold the scratch directory for the task's whole life; it is
            // deleted on drop, after the terminal transition below.
            let _scratch = scratch;

            // Wait for a device slot. A shutdown while queued fails the
            // job without it ever starting.
            let _permit = tokio::select! {
                _ = cancel.cancelled() => {
                    record_failure(&store, id, "Cancelled before starting".into()).await;
                    return;
                }
                permit = semaphore.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        record_failure(&store, id, "Runner shut down".into()).await;
                        return;
                    }
                },
            };

            if let Err(e) = store.mark_processing(id).await {
                tracing::error!(job_id = %id, error = %e, "Could not mark job processing");
                return;
            }
            tracing::info!(job_id = %id, "Job started");

            // Forward coarse progress updates from the service into the store.
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let progress_store = store.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(value) = progress_rx.recv().await {
                    progress_store.set_progress(id, value).await;
                }
            });

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    Err("Cancelled by shutdown".to_string())
                }
                result = tokio::time::timeout(
                    job_timeout,
                    service.generate(&image_path, &params, &output_path, Some(&progress_tx)),
                ) => match result {
                    Ok(Ok(path)) => Ok(path),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!(
                        "Generation exceeded the {}s deadline",
                        job_timeout.as_secs()
                    )),
                },
            };
            drop(progress_tx);
            let _ = forwarder.await;

            match outcome {
                Ok(path) => {
                    let path = path.to_string_lossy().into_owned();
                    if let Err(e) = store.complete(id, path).await {
                        tracing::error!(job_id = %id, error = %e, "Could not mark job completed");
                    } else {
                        tracing::info!(job_id = %id, "Job completed");
                    }
                }
                Err(message) => {
                    tracing::warn!(job_id = %id, error = %message, "Job failed");
                    record_failure(&store, id, message).await;
                }
            }
        })
    }

    /// Cancel all jobs and wait for in-flight tasks to settle.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!("Shutting down job runner");
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!("Job tasks did not settle within the shutdown grace period");
        }
    }
}

/// Record a failure, tolerating records that are already terminal.
async fn record_failure(store: &JobStore, id: JobId, message: String) {
    if let Err(e) = store.fail(id, message).await {
        tracing::debug!(job_id = %id, error = %e, "Failure not recorded (job already terminal)");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
