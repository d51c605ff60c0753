//! The model service: lazy initialization, preprocessing, generation, and
//! encoding, serialized on a single device lock.
//!
//! Constructed once at startup and shared via `Arc`. The diffusion device
//! cannot be meaningfully parallelized, so `initialize` and every
//! `generate` call take the same `tokio::sync::Mutex`; status reads for
//! the health endpoint go through a separate `std::sync::RwLock` so they
//! never wait behind a running generation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use image::imageops::FilterType;
use tokio::sync::mpsc;

use stillmotion_core::imaging::{self, MAX_INPUT_DIMENSION};
use stillmotion_core::params::GenerationParams;

use crate::device::{self, Device, GpuInfo};
use crate::encoder::{EncodeError, VideoEncoder};
use crate::sidecar::{DiffusionPipeline, FrameRequest, LoadSpec, PipelineError};

/// Progress stage reported once preprocessing is done.
const PROGRESS_PREPROCESSED: u8 = 25;
/// Progress stage reported once frames exist and encoding starts.
const PROGRESS_FRAMES_READY: u8 = 75;

/// Errors from the model service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Device selection or model load failed; the service stays
    /// uninitialized.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The source image could not be read or decoded.
    #[error("Invalid input image: {0}")]
    InvalidImage(String),

    /// The pipeline invocation failed.
    #[error("Generation failed: {0}")]
    Generation(#[from] PipelineError),

    /// Frames could not be encoded into a video.
    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Construction-time options for the service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Pretrained model identifier passed to the sidecar.
    pub model_id: String,
    /// Preferred compute device (falls back to CPU when unavailable).
    pub preferred_device: Device,
    /// Reduced precision + offload/slicing vs full precision resident.
    pub memory_efficient: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            model_id: "stabilityai/stable-video-diffusion-img2vid-xt".to_string(),
            preferred_device: Device::Cuda,
            memory_efficient: true,
        }
    }
}

/// Snapshot of the service state for the health endpoint.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub initialized: bool,
    /// The configured device until initialization selects the actual one.
    pub device: Device,
    pub gpu: Option<GpuInfo>,
}

/// Owns the pipeline handle and serializes all device work.
pub struct ModelService {
    pipeline: Arc<dyn DiffusionPipeline>,
    encoder: Arc<dyn VideoEncoder>,
    options: ServiceOptions,
    /// Serializes model load and every generate call on the device.
    device_lock: tokio::sync::Mutex<()>,
    status: std::sync::RwLock<ServiceStatus>,
}

impl ModelService {
    pub fn new(
        pipeline: Arc<dyn DiffusionPipeline>,
        encoder: Arc<dyn VideoEncoder>,
        options: ServiceOptions,
    ) -> Self {
        let status = ServiceStatus {
            initialized: false,
            device: options.preferred_device,
            gpu: None,
        };
        Self {
            pipeline,
            encoder,
            options,
            device_lock: tokio::sync::Mutex::new(()),
            status: std::sync::RwLock::new(status),
        }
    }

    /// Current status snapshot. Never waits behind a running generation.
    pub fn status(&self) -> ServiceStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Select the device and load the model. Idempotent and safe to call
    /// concurrently; a load failure leaves the service uninitialized.
    pub async fn initialize(&self) -> Result<(), ServiceError> {
        let _guard = self.device_lock.lock().await;
        self.initialize_locked().await
    }

    /// Generate a video from `image_path` into `output_path`.
    ///
    /// Lazily initializes when needed. Holds the device lock for the whole
    /// call: concurrent callers queue rather than racing on the device.
    /// Optional progress updates (`0..=100`) are sent on `progress`.
    pub async fn generate(
        &self,
        image_path: &Path,
        params: &GenerationParams,
        output_path: &Path,
        progress: Option<&mpsc::UnboundedSender<u8>>,
    ) -> Result<PathBuf, ServiceError> {
        let _guard = self.device_lock.lock().await;
        self.initialize_locked().await?;

        let started = Instant::now();

        // Scratch directory for the preprocessed input and raw frames;
        // deleted on drop, including on the error paths.
        let work_dir = tempfile::tempdir()?;

        let (source, width, height) = preprocess_image(image_path, work_dir.path()).await?;
        report(progress, PROGRESS_PREPROCESSED);

        let seed = params.seed.unwrap_or_else(unix_time_seed);
        let num_frames = params.frame_count();

        let frames_dir = work_dir.path().join("frames");
        tokio::fs::create_dir_all(&frames_dir).await?;

        let request = FrameRequest {
            image_path: source,
            width,
            height,
            num_frames,
            motion_bucket_id: params.motion_bucket_id(),
            fps: params.fps,
            seed,
            frames_dir: frames_dir.clone(),
        };

        tracing::info!(
            num_frames,
            fps = params.fps,
            motion_bucket_id = request.motion_bucket_id,
            seed,
            "Generating video frames"
        );

        let frames = match self.pipeline.generate(&request).await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(error = %e, "Pipeline generation failed");
                return Err(e.into());
            }
        };

        if frames.len() as u32 != num_frames {
            tracing::warn!(
                requested = num_frames,
                produced = frames.len(),
                "Pipeline produced a different frame count than requested"
            );
        }
        report(progress, PROGRESS_FRAMES_READY);

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if let Err(e) = self
            .encoder
            .encode(&frames_dir, params.fps, output_path)
            .await
        {
            tracing::error!(error = %e, "Video encoding failed");
            return Err(e.into());
        }

        tracing::info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            output = %output_path.display(),
            "Video generated"
        );

        Ok(output_path.to_path_buf())
    }

    /// Release the pipeline handle and clear device caches.
    pub async fn free_memory(&self) -> Result<(), ServiceError> {
        let _guard = self.device_lock.lock().await;

        if !self.status().initialized {
            return Ok(());
        }

        self.pipeline
            .unload()
            .await
            .map_err(|e| ServiceError::Internal(format!("Failed to unload pipeline: {e}")))?;

        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        status.initialized = false;
        tracing::info!("Pipeline released, device memory cleared");
        Ok(())
    }

    // ---- private helpers ----

    /// Initialization body; caller must hold `device_lock`.
    async fn initialize_locked(&self) -> Result<(), ServiceError> {
        if self.status().initialized {
            return Ok(());
        }

        let (selected, gpu) = device::select_device(self.options.preferred_device).await;

        let spec = LoadSpec {
            model_id: self.options.model_id.clone(),
            device: selected,
            memory_efficient: self.options.memory_efficient,
        };

        self.pipeline
            .load(&spec)
            .await
            .map_err(|e| ServiceError::Initialization(e.to_string()))?;

        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        status.initialized = true;
        status.device = selected;
        status.gpu = gpu;

        tracing::info!(
            model_id = %self.options.model_id,
            device = %selected,
            memory_efficient = self.options.memory_efficient,
            "Model initialized"
        );
        Ok(())
    }
}

/// Seed derived from wall-clock seconds, used when the caller gives none.
fn unix_time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn report(progress: Option<&mpsc::UnboundedSender<u8>>, value: u8) {
    if let Some(tx) = progress {
        let _ = tx.send(value);
    }
}

/// Decode the source image and downscale it under the dimension cap,
/// preserving aspect ratio. Returns the path to feed the pipeline plus the
/// final dimensions. Decoding and resampling are CPU-bound, so they run on
/// the blocking pool.
async fn preprocess_image(
    image_path: &Path,
    work_dir: &Path,
) -> Result<(PathBuf, u32, u32), ServiceError> {
    let image_path = image_path.to_path_buf();
    let resized_path = work_dir.join("input.png");

    tokio::task::spawn_blocking(move || {
        let img = image::open(&image_path)
            .map_err(|e| ServiceError::InvalidImage(e.to_string()))?;

        let (width, height) = (img.width(), img.height());
        imaging::validate_dimensions(width, height)
            .map_err(|e| ServiceError::InvalidImage(e.to_string()))?;

        match imaging::fit_within(width, height, MAX_INPUT_DIMENSION) {
            Some((new_w, new_h)) => {
                let resized = img.resize_exact(new_w, new_h, FilterType::Lanczos3);
                resized
                    .save(&resized_path)
                    .map_err(|e| ServiceError::InvalidImage(e.to_string()))?;
                tracing::info!(
                    from = %format!("{width}x{height}"),
                    to = %format!("{new_w}x{new_h}"),
                    "Resized input image to fit device memory constraints"
                );
                Ok((resized_path, new_w, new_h))
            }
            None => Ok((image_path, width, height)),
        }
    })
    .await
    .map_err(|e| ServiceError::Internal(format!("preprocess task panicked: {e}")))?
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pipeline double: counts load calls and writes the requested frames.
    struct FakePipeline {
        loads: AtomicUsize,
        fail_load: bool,
    }

    impl FakePipeline {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_load: false,
            }
        }

        fn failing() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_load: true,
            }
        }
    }

    #[async_trait]
    impl DiffusionPipeline for FakePipeline {
        async fn load(&self, _spec: &LoadSpec) -> Result<(), PipelineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                return Err(PipelineError::Api {
                    status: 500,
                    body: "weights missing".into(),
                });
            }
            Ok(())
        }

        async fn generate(&self, request: &FrameRequest) -> Result<Vec<PathBuf>, PipelineError> {
            let mut frames = Vec::new();
            for i in 0..request.num_frames {
                let path = crate::sidecar::frame_path(&request.frames_dir, i);
                std::fs::write(&path, b"png").map_err(|_| PipelineError::EmptyOutput)?;
                frames.push(path);
            }
            Ok(frames)
        }

        async fn unload(&self) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    /// Encoder double: records the fps and writes a marker file.
    struct FakeEncoder;

    #[async_trait]
    impl VideoEncoder for FakeEncoder {
        async fn encode(
            &self,
            frames_dir: &Path,
            _fps: u32,
            output: &Path,
        ) -> Result<(), EncodeError> {
            let count = std::fs::read_dir(frames_dir)?.count();
            std::fs::write(output, format!("video:{count}"))?;
            Ok(())
        }
    }

    fn cpu_options() -> ServiceOptions {
        ServiceOptions {
            preferred_device: Device::Cpu,
            ..Default::default()
        }
    }

    fn service_with(pipeline: FakePipeline) -> ModelService {
        ModelService::new(Arc::new(pipeline), Arc::new(FakeEncoder), cpu_options())
    }

    fn test_image(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("input.png");
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        img.save(&path).unwrap();
        path
    }

    // -- initialize -----------------------------------------------------------

    #[tokio::test]
    async fn status_reports_configured_device_before_init() {
        let service = service_with(FakePipeline::new());
        let status = service.status();
        assert!(!status.initialized);
        assert_eq!(status.device, Device::Cpu);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let service = service_with(FakePipeline::new());
        service.initialize().await.unwrap();
        service.initialize().await.unwrap();

        let status = service.status();
        assert!(status.initialized);
        assert_eq!(status.device, Device::Cpu);
    }

    #[tokio::test]
    async fn failed_load_leaves_service_uninitialized() {
        let service = service_with(FakePipeline::failing());
        let err = service.initialize().await.unwrap_err();
        assert_matches!(err, ServiceError::Initialization(_));
        assert!(!service.status().initialized);
    }

    // -- generate -------------------------------------------------------------

    #[tokio::test]
    async fn generate_lazily_initializes_and_writes_output() {
        let scratch = tempfile::tempdir().unwrap();
        let image = test_image(scratch.path(), 64, 64);
        let output = scratch.path().join("out.mp4");

        let service = service_with(FakePipeline::new());
        let params = GenerationParams {
            duration_secs: 1.0,
            fps: 8,
            ..Default::default()
        };

        let written = service
            .generate(&image, &params, &output, None)
            .await
            .unwrap();

        assert_eq!(written, output);
        assert!(service.status().initialized);
        // 8 frames were produced and seen by the encoder.
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "video:8");
    }

    #[tokio::test]
    async fn generate_reports_progress_stages() {
        let scratch = tempfile::tempdir().unwrap();
        let image = test_image(scratch.path(), 32, 32);
        let output = scratch.path().join("out.mp4");

        let service = service_with(FakePipeline::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        service
            .generate(&image, &GenerationParams::default(), &output, Some(&tx))
            .await
            .unwrap();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(v) = rx.recv().await {
            seen.push(v);
        }
        assert_eq!(seen, vec![PROGRESS_PREPROCESSED, PROGRESS_FRAMES_READY]);
    }

    #[tokio::test]
    async fn unreadable_image_is_an_input_error() {
        let scratch = tempfile::tempdir().unwrap();
        let bogus = scratch.path().join("not-an-image.png");
        std::fs::write(&bogus, b"definitely not a png").unwrap();

        let service = service_with(FakePipeline::new());
        let err = service
            .generate(
                &bogus,
                &GenerationParams::default(),
                &scratch.path().join("out.mp4"),
                None,
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidImage(_));
    }

    // -- free_memory ----------------------------------------------------------

    #[tokio::test]
    async fn free_memory_resets_initialized() {
        let service = service_with(FakePipeline::new());
        service.initialize().await.unwrap();
        service.free_memory().await.unwrap();
        assert!(!service.status().initialized);

        // And a later call re-initializes lazily.
        service.initialize().await.unwrap();
        assert!(service.status().initialized);
    }

    #[tokio::test]
    async fn free_memory_on_uninitialized_service_is_a_no_op() {
        let service = service_with(FakePipeline::new());
        service.free_memory().await.unwrap();
        assert!(!service.status().initialized);
    }
}
