//! Handlers for job submission, status polling, and video retrieval.
//!
//! `POST /api/process` accepts a multipart upload, persists the image into
//! a per-job scratch directory, inserts a `Pending` record, and hands the
//! job to the runner -- it never blocks on generation.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use stillmotion_core::error::CoreError;
use stillmotion_core::job::{JobId, JobStatus};
use stillmotion_core::params::GenerationParams;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Image file extensions accepted for upload; anything else is stored as
/// `.png` and left to the decoder to reject.
const KNOWN_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Response for a successful submission.
#[derive(Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: &'static str,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/process
///
/// Multipart form: an `image` file part plus optional `motion_strength`,
/// `duration`, `fps`, and `seed` fields. Returns 400 when the image part
/// is missing or a field fails to parse; otherwise 200 with the new job id
/// in `PENDING` state.
pub async fn submit(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<SubmitResponse>> {
    let mut image: Option<(Vec<u8>, String)> = None;
    let mut params = GenerationParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let extension = extension_for(field.file_name());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read image: {e}")))?;
                image = Some((bytes.to_vec(), extension));
            }
            "motion_strength" => {
                params.motion_strength = parse_field(field, "motion_strength").await?;
            }
            "duration" => {
                params.duration_secs = parse_field(field, "duration").await?;
            }
            "fps" => {
                params.fps = parse_field(field, "fps").await?;
            }
            "seed" => {
                params.seed = Some(parse_field(field, "seed").await?);
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown form field");
            }
        }
    }

    let (bytes, extension) =
        image.ok_or_else(|| AppError::BadRequest("No image provided".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("Uploaded image is empty".to_string()));
    }
    params.validate()?;

    // Per-job scratch directory; the runner deletes it once the job is
    // terminal.
    let scratch = tempfile::tempdir()
        .map_err(|e| AppError::InternalError(format!("Failed to create scratch dir: {e}")))?;
    let image_path = scratch
        .path()
        .join(format!("input_{}.{extension}", Uuid::new_v4().simple()));
    tokio::fs::write(&image_path, &bytes)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to persist upload: {e}")))?;

    let job_id = Uuid::new_v4();
    state.jobs.create(job_id).await;
    state.runner.spawn(job_id, scratch, image_path, params);

    tracing::info!(
        job_id = %job_id,
        motion_strength = params.motion_strength,
        duration_secs = params.duration_secs,
        fps = params.fps,
        "Job submitted",
    );

    Ok(Json(SubmitResponse {
        job_id,
        status: JobStatus::Pending.as_str(),
    }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/jobs/{id}
///
/// Returns the job record, or 404 for an unknown (or unparseable) id.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<stillmotion_core::job::JobRecord>> {
    let job_id = parse_job_id(&id)?;
    let record = state.jobs.get(job_id).await?;
    Ok(Json(record))
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// GET /api/jobs/{id}/video
///
/// Streams the finished MP4. 404 for an unknown job, 400 while the job has
/// not completed.
pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let job_id = parse_job_id(&id)?;
    let record = state.jobs.get(job_id).await?;

    if record.status != JobStatus::Completed {
        return Err(AppError::NotReady(format!(
            "Video not ready: job is {}",
            record.status.as_str()
        )));
    }
    let output_path = record.output_path.ok_or_else(|| {
        AppError::InternalError("Completed job has no output path".to_string())
    })?;

    let file = tokio::fs::File::open(&output_path).await.map_err(|_| {
        AppError::Core(CoreError::NotFound {
            entity: "VideoFile",
            id: job_id.to_string(),
        })
    })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to stat video file: {e}")))?
        .len();

    let stream = ReaderStream::new(file);
    Response::builder()
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::InternalError(format!("Failed to build response: {e}")))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unknown and malformed ids are indistinguishable to the caller: both 404.
fn parse_job_id(raw: &str) -> AppResult<JobId> {
    Uuid::parse_str(raw).map_err(|_| {
        AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: raw.to_string(),
        })
    })
}

/// Pick a safe file extension for the stored upload.
fn extension_for(file_name: Option<&str>) -> String {
    let ext = file_name
        .and_then(|name| name.rsplit('.').next())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if KNOWN_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        ext
    } else {
        "png".to_string()
    }
}

/// Read a text form field and parse it, mapping failures to 400.
async fn parse_field<T: std::str::FromStr>(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> AppResult<T> {
    let text = field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read field '{name}': {e}")))?;
    text.trim()
        .parse::<T>()
        .map_err(|_| AppError::BadRequest(format!("Invalid value for '{name}': {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_are_kept() {
        assert_eq!(extension_for(Some("photo.JPG")), "jpg");
        assert_eq!(extension_for(Some("a.b.webp")), "webp");
    }

    #[test]
    fn unknown_extensions_default_to_png() {
        assert_eq!(extension_for(Some("archive.tar.gz")), "png");
        assert_eq!(extension_for(Some("noext")), "png");
        assert_eq!(extension_for(None), "png");
    }

    #[test]
    fn malformed_job_id_maps_to_not_found() {
        let err = parse_job_id("not-a-uuid").unwrap_err();
        assert!(matches!(
            err,
            AppError::Core(CoreError::NotFound { entity: "Job", .. })
        ));
    }
}
