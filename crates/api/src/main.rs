use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stillmotion_api::config::ServerConfig;
use stillmotion_api::router::build_router;
use stillmotion_api::state::AppState;
use stillmotion_pipeline::encoder::CommandEncoder;
use stillmotion_pipeline::device::Device;
use stillmotion_pipeline::{ModelService, ServiceOptions, SidecarPipeline};
use stillmotion_worker::{JobRunner, JobStore, RunnerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stillmotion_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Model service ---
    let pipeline = Arc::new(SidecarPipeline::new(config.pipeline_url.clone()));
    let encoder = Arc::new(CommandEncoder::default());
    let service = Arc::new(ModelService::new(
        pipeline,
        encoder,
        ServiceOptions {
            model_id: config.model_id.clone(),
            preferred_device: Device::Cuda,
            memory_efficient: config.memory_efficient,
        },
    ));

    // Eager initialization: the server must not accept work without a
    // loaded model.
    service
        .initialize()
        .await
        .expect("Failed to initialize model service");
    tracing::info!("Model service initialized");

    // --- Job store and runner ---
    let jobs = JobStore::new();
    let runner = Arc::new(JobRunner::new(
        jobs.clone(),
        Arc::clone(&service),
        RunnerConfig {
            max_concurrent_jobs: config.max_concurrent_jobs,
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            output_dir: PathBuf::from(&config.output_dir),
        },
    ));

    // --- App state and router ---
    let state = AppState {
        service: Arc::clone(&service),
        jobs,
        runner: Arc::clone(&runner),
        config: Arc::new(config.clone()),
    };
    let app = build_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    runner.shutdown(Duration::from_secs(10)).await;
    tracing::info!("Job runner stopped");

    if let Err(e) = service.free_memory().await {
        tracing::warn!(error = %e, "Failed to release pipeline during shutdown");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
