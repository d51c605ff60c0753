//! Client for the diffusion inference sidecar.
//!
//! The pretrained Stable Video Diffusion pipeline runs in a separate
//! inference process that exposes a small HTTP API (`/load`, `/generate`,
//! `/unload`). The sidecar writes the generated frames as numbered PNGs
//! into a directory this process hands it, so the encoder can pick them up
//! without shuttling frame data over HTTP.
//!
//! [`DiffusionPipeline`] is the seam the rest of the workspace depends on;
//! tests substitute their own implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::Device;

/// Model load request: which weights, where, and how.
#[derive(Debug, Clone, Serialize)]
pub struct LoadSpec {
    /// Pretrained model identifier, e.g.
    /// `stabilityai/stable-video-diffusion-img2vid-xt`.
    pub model_id: String,
    /// Device the weights should live on.
    pub device: Device,
    /// Memory/quality tradeoff: reduced precision with cpu-offload and
    /// attention slicing when true, full precision resident when false.
    pub memory_efficient: bool,
}

/// One synchronous frame-generation request.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRequest {
    /// Preprocessed source image (already under the dimension cap).
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Exact number of frames to produce.
    pub num_frames: u32,
    /// Motion magnitude in the pipeline's internal `0..=255` range.
    pub motion_bucket_id: u32,
    pub fps: u32,
    /// RNG seed (always concrete by this point).
    pub seed: u64,
    /// Directory the sidecar must write `frame_{:06}.png` files into.
    pub frames_dir: PathBuf,
}

/// Sidecar response to a generate call.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    /// Ordered paths of the written frames.
    frames: Vec<PathBuf>,
}

/// Errors from the sidecar HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The HTTP request itself failed (network, DNS, connection refused).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The sidecar returned a non-2xx status code.
    #[error("pipeline host error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The sidecar reported success but produced no frames.
    #[error("pipeline returned no frames")]
    EmptyOutput,
}

/// Handle to a loaded (or loadable) diffusion pipeline.
#[async_trait]
pub trait DiffusionPipeline: Send + Sync {
    /// Load the pretrained weights. Must be idempotent on the sidecar side.
    async fn load(&self, spec: &LoadSpec) -> Result<(), PipelineError>;

    /// Produce `request.num_frames` ordered frames. Blocks for the whole
    /// generation; there is exactly one invocation per job.
    async fn generate(&self, request: &FrameRequest) -> Result<Vec<PathBuf>, PipelineError>;

    /// Release the weights and clear device memory caches.
    async fn unload(&self) -> Result<(), PipelineError>;
}

/// HTTP implementation of [`DiffusionPipeline`] against the sidecar.
pub struct SidecarPipeline {
    client: reqwest::Client,
    base_url: String,
}

impl SidecarPipeline {
    /// Create a client for a sidecar at `base_url`, e.g.
    /// `http://127.0.0.1:8500`.
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Ensure the response has a success status; on failure capture the
    /// status and body for the error message.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, PipelineError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PipelineError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DiffusionPipeline for SidecarPipeline {
    async fn load(&self, spec: &LoadSpec) -> Result<(), PipelineError> {
        let response = self
            .client
            .post(self.url("/load"))
            .json(spec)
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn generate(&self, request: &FrameRequest) -> Result<Vec<PathBuf>, PipelineError> {
        let response = self
            .client
            .post(self.url("/generate"))
            .json(request)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let parsed = response.json::<GenerateResponse>().await?;

        if parsed.frames.is_empty() {
            return Err(PipelineError::EmptyOutput);
        }
        Ok(parsed.frames)
    }

    async fn unload(&self) -> Result<(), PipelineError> {
        let response = self.client.post(self.url("/unload")).send().await?;
        Self::ensure_success(response).await?;
        Ok(())
    }
}

/// Frame file name for index `i` inside a frames directory.
pub fn frame_file_name(i: u32) -> String {
    format!("frame_{i:06}.png")
}

/// Full path of frame `i` inside `frames_dir`.
pub fn frame_path(frames_dir: &Path, i: u32) -> PathBuf {
    frames_dir.join(frame_file_name(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_names_are_zero_padded_and_ordered() {
        assert_eq!(frame_file_name(0), "frame_000000.png");
        assert_eq!(frame_file_name(71), "frame_000071.png");
        // Lexicographic order matches numeric order under the padding.
        assert!(frame_file_name(9) < frame_file_name(10));
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let pipeline = SidecarPipeline::new("http://127.0.0.1:8500/".into());
        assert_eq!(pipeline.url("/generate"), "http://127.0.0.1:8500/generate");
    }
}
