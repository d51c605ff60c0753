/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development; override via
/// environment variables (a `.env` file is honored at startup).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Base URL of the diffusion inference sidecar.
    pub pipeline_url: String,
    /// Pretrained model identifier passed to the sidecar.
    pub model_id: String,
    /// Reduced-precision/offload mode vs full precision resident.
    pub memory_efficient: bool,
    /// Maximum simultaneous generation jobs.
    pub max_concurrent_jobs: usize,
    /// Per-job deadline in seconds.
    pub job_timeout_secs: u64,
    /// Persistent directory for finished videos.
    pub output_dir: String,
    /// Largest accepted request body in megabytes. Covers the multipart
    /// image upload; oversized inputs are downscaled, not rejected.
    pub max_upload_mb: usize,
    /// Allowed CORS origins, comma-separated in `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (does not apply to generation,
    /// which runs in background tasks).
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                         |
    /// |------------------------|-------------------------------------------------|
    /// | `HOST`                 | `0.0.0.0`                                       |
    /// | `PORT`                 | `5000`                                          |
    /// | `PIPELINE_URL`         | `http://127.0.0.1:8500`                         |
    /// | `MODEL_ID`             | `stabilityai/stable-video-diffusion-img2vid-xt` |
    /// | `MEMORY_EFFICIENT`     | `true`                                          |
    /// | `MAX_CONCURRENT_JOBS`  | `1`                                             |
    /// | `JOB_TIMEOUT_SECS`     | `600`                                           |
    /// | `OUTPUT_DIR`           | `storage/outputs`                               |
    /// | `MAX_UPLOAD_MB`        | `25`                                            |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`                         |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                                            |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "5000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let pipeline_url =
            std::env::var("PIPELINE_URL").unwrap_or_else(|_| "http://127.0.0.1:8500".into());

        let model_id = std::env::var("MODEL_ID")
            .unwrap_or_else(|_| "stabilityai/stable-video-diffusion-img2vid-xt".into());

        let memory_efficient: bool = std::env::var("MEMORY_EFFICIENT")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .expect("MEMORY_EFFICIENT must be true or false");

        let max_concurrent_jobs: usize = std::env::var("MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("MAX_CONCURRENT_JOBS must be a valid usize");

        let job_timeout_secs: u64 = std::env::var("JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("JOB_TIMEOUT_SECS must be a valid u64");

        let output_dir = std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "storage/outputs".into());

        let max_upload_mb: usize = std::env::var("MAX_UPLOAD_MB")
            .unwrap_or_else(|_| "25".into())
            .parse()
            .expect("MAX_UPLOAD_MB must be a valid usize");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            pipeline_url,
            model_id,
            memory_efficient,
            max_concurrent_jobs,
            job_timeout_secs,
            output_dir,
            max_upload_mb,
            cors_origins,
            request_timeout_secs,
        }
    }
}
