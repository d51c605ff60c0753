//! Model service for the stillmotion image-to-video pipeline.
//!
//! The actual diffusion computation runs in an external inference sidecar
//! reached over HTTP; this crate owns device selection, the sidecar client,
//! frame-to-video encoding (with an ordered encoder fallback), and the
//! [`service::ModelService`] that ties them together behind a single
//! device lock.

pub mod device;
pub mod encoder;
pub mod service;
pub mod sidecar;

pub use service::{ModelService, ServiceError, ServiceOptions, ServiceStatus};
pub use sidecar::{DiffusionPipeline, SidecarPipeline};
