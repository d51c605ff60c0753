//! Job store and runner for asynchronous video-generation jobs.
//!
//! The store is a concurrency-safe in-memory map of job records; the
//! runner spawns one bounded task per submitted job with a per-job
//! deadline and cooperative cancellation.

pub mod runner;
pub mod store;

pub use runner::{JobRunner, RunnerConfig};
pub use store::JobStore;
