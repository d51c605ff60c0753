//! Output naming for generated videos.

/// Output file name for a job artifact inside the persistent output
/// directory: `{job_id}.mp4`.
pub fn job_output_name(job_id: uuid::Uuid) -> String {
    format!("{job_id}.mp4")
}
