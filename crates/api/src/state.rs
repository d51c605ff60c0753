use std::sync::Arc;

use stillmotion_pipeline::ModelService;
use stillmotion_worker::{JobRunner, JobStore};

use crate::config::ServerConfig;

/// Shared application state injected into every handler.
///
/// All fields are cheap to clone (`Arc`s and an `Arc`-backed store).
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ModelService>,
    pub jobs: JobStore,
    pub runner: Arc<JobRunner>,
    pub config: Arc<ServerConfig>,
}
