//! HTTP surface for the stillmotion image-to-video service.
//!
//! Exposed as a library so integration tests can build the router with
//! test doubles injected through the pipeline and encoder seams.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
