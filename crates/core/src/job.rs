//! Job records and the job status state machine.
//!
//! Transitions are strictly monotonic: `Pending -> Processing ->
//! {Completed | Failed}`. A record in a terminal state is never mutated
//! again; the store enforces this by routing every mutation through
//! [`JobRecord::transition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Opaque job identifier.
pub type JobId = Uuid;

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Legal edges: `Pending -> Processing`, `Processing -> Completed`,
    /// `Processing -> Failed`, and `Pending -> Failed` (a job that never
    /// started, e.g. rejected at spawn or cancelled while queued).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Wire representation used in API responses (`"PENDING"` etc.).
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

/// One asynchronous unit of work: one input image to one output video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    /// Coarse completion percentage, `0..=100`.
    pub progress: u8,
    /// Path of the produced video; set only on completion.
    pub output_path: Option<String>,
    /// Failure message; set only when the job fails.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a fresh record in `Pending` with zero progress.
    pub fn new(id: JobId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            output_path: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move the record to `next`, enforcing the state machine.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Validation(format!(
                "Illegal job transition {} -> {}",
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the job completed with its output artifact.
    pub fn complete(&mut self, output_path: String) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.output_path = Some(output_path);
        Ok(())
    }

    /// Mark the job failed with a human-readable message.
    pub fn fail(&mut self, message: String) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
