//! Domain types and pure logic for the stillmotion image-to-video service.
//!
//! This crate has no I/O: job state machine, generation parameters,
//! image-fit math, and output naming live here so both the worker and the
//! API can share them.

pub mod error;
pub mod imaging;
pub mod job;
pub mod naming;
pub mod params;
