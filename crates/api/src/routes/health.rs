use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Whether the diffusion model is loaded.
    pub model_loaded: bool,
    /// Compute device (`cuda` or `cpu`); the configured device until the
    /// model loads, the selected one after.
    pub device: &'static str,
    /// GPU name and memory, or `"GPU not available"`.
    pub gpu_info: String,
}

/// GET /api/health -- always 200; reports model and device state.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.service.status();

    let gpu_info = status
        .gpu
        .as_ref()
        .map(|gpu| gpu.describe())
        .unwrap_or_else(|| "GPU not available".to_string());

    Json(HealthResponse {
        status: "healthy",
        model_loaded: status.initialized,
        device: status.device.as_str(),
        gpu_info,
    })
}

/// Mount health check routes under `/api`.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}
