//! Shared helpers for API integration tests.
//!
//! Builds the full application router with the production middleware
//! stack, but with the diffusion pipeline and the video encoder replaced
//! by in-process doubles injected through their seams -- no sidecar, no
//! ffmpeg.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use stillmotion_api::config::ServerConfig;
use stillmotion_api::router::build_router;
use stillmotion_api::state::AppState;
use stillmotion_core::job::{JobId, JobStatus};
use stillmotion_pipeline::device::Device;
use stillmotion_pipeline::encoder::{EncodeError, VideoEncoder};
use stillmotion_pipeline::sidecar::{
    frame_path, DiffusionPipeline, FrameRequest, LoadSpec, PipelineError,
};
use stillmotion_pipeline::{ModelService, ServiceOptions};
use stillmotion_worker::{JobRunner, JobStore, RunnerConfig};

/// Multipart boundary used by the request builders below.
const BOUNDARY: &str = "stillmotion-test-boundary";

/// Pipeline double: writes the requested number of frames after an
/// optional delay, or fails every generate call.
pub struct MockPipeline {
    pub delay: Duration,
    pub fail_generate: bool,
}

impl Default for MockPipeline {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_generate: false,
        }
    }
}

#[async_trait]
impl DiffusionPipeline for MockPipeline {
    async fn load(&self, _spec: &LoadSpec) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn generate(&self, request: &FrameRequest) -> Result<Vec<PathBuf>, PipelineError> {
        tokio::time::sleep(self.delay).await;
        if self.fail_generate {
            return Err(PipelineError::Api {
                status: 500,
                body: "generation failed".into(),
            });
        }
        let mut frames = Vec::new();
        for i in 0..request.num_frames {
            let path = frame_path(&request.frames_dir, i);
            std::fs::write(&path, b"png").map_err(|_| PipelineError::EmptyOutput)?;
            frames.push(path);
        }
        Ok(frames)
    }

    async fn unload(&self) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// Encoder double: writes a deterministic artifact embedding the frame
/// count so tests can assert the streamed bytes match the file on disk.
pub struct MockEncoder;

#[async_trait]
impl VideoEncoder for MockEncoder {
    async fn encode(
        &self,
        frames_dir: &Path,
        fps: u32,
        output: &Path,
    ) -> Result<(), EncodeError> {
        let count = std::fs::read_dir(frames_dir)?.count();
        std::fs::write(output, format!("mp4|frames={count}|fps={fps}"))?;
        Ok(())
    }
}

/// Everything a test needs to drive the app and observe job state.
pub struct TestApp {
    pub app: Router,
    pub jobs: JobStore,
    /// Output directory; held so the TempDir outlives the test.
    pub output_dir: tempfile::TempDir,
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(output_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        pipeline_url: "http://127.0.0.1:0".to_string(),
        model_id: "test-model".to_string(),
        memory_efficient: true,
        max_concurrent_jobs: 2,
        job_timeout_secs: 30,
        output_dir: output_dir.to_string_lossy().into_owned(),
        max_upload_mb: 25,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// Build the application with the default (fast, succeeding) doubles.
pub fn build_test_app() -> TestApp {
    build_test_app_with(MockPipeline::default())
}

/// Build the application with a specific pipeline double.
///
/// Mirrors the construction in `main.rs` so tests exercise the same
/// middleware stack production uses.
pub fn build_test_app_with(pipeline: MockPipeline) -> TestApp {
    let output_dir = tempfile::tempdir().expect("create output dir");
    let config = test_config(output_dir.path());

    let service = Arc::new(ModelService::new(
        Arc::new(pipeline),
        Arc::new(MockEncoder),
        ServiceOptions {
            model_id: config.model_id.clone(),
            // CPU skips the GPU probe, keeping tests hermetic.
            preferred_device: Device::Cpu,
            memory_efficient: config.memory_efficient,
        },
    ));

    let jobs = JobStore::new();
    let runner = Arc::new(JobRunner::new(
        jobs.clone(),
        Arc::clone(&service),
        RunnerConfig {
            max_concurrent_jobs: config.max_concurrent_jobs,
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            output_dir: output_dir.path().to_path_buf(),
        },
    ));

    let state = AppState {
        service,
        jobs: jobs.clone(),
        runner,
        config: Arc::new(config),
    };

    TestApp {
        app: build_router(state),
        jobs,
        output_dir,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Send a GET request to the app.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("build request"),
    )
    .await
    .expect("infallible")
}

/// A tiny valid PNG for uploads (1x1 white pixel).
pub fn test_png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(1, 1, image::Rgb([255, 255, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

/// A PNG of per-pixel noise, too random for the codec to compress;
/// used to exercise large uploads.
pub fn noisy_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let v = x
            .wrapping_mul(height)
            .wrapping_add(y)
            .wrapping_mul(2_654_435_761);
        image::Rgb([(v >> 16) as u8, (v >> 8) as u8, v as u8])
    });
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode png");
    bytes.into_inner()
}

/// Build a `POST /api/process` multipart request body.
///
/// `image` is an optional (file name, bytes) pair; `fields` are plain
/// text form fields.
pub fn multipart_body(image: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();

    if let Some((file_name, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; \
                 filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }

    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Send a multipart POST to `/api/process`.
pub async fn post_process(
    app: Router,
    image: Option<(&str, &[u8])>,
    fields: &[(&str, &str)],
) -> Response<Body> {
    let body = multipart_body(image, fields);
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/api/process")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("build request"),
    )
    .await
    .expect("infallible")
}

/// Collect a response body as raw bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("body is valid JSON")
}

/// Poll the store until the job reaches a terminal state. The window is
/// generous: large-upload tests decode and resize real pixels in debug
/// builds.
pub async fn wait_for_terminal(jobs: &JobStore, id: JobId) -> JobStatus {
    for _ in 0..800 {
        let record = jobs.get(id).await.expect("job exists");
        if record.status.is_terminal() {
            return record.status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} did not reach a terminal state in time");
}

/// Assert a response is a JSON error with the given status.
pub async fn assert_error(response: Response<Body>, expected: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), expected);
    let json = body_json(response).await;
    assert!(json["error"].is_string(), "error body: {json}");
    json
}
