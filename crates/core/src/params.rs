//! Generation parameters: validation, frame-count arithmetic, and the
//! motion-strength scaling used by the diffusion pipeline.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults and bounds
// ---------------------------------------------------------------------------

/// Default motion strength when the caller omits it.
pub const DEFAULT_MOTION_STRENGTH: f64 = 0.5;

/// Default clip duration in seconds.
pub const DEFAULT_DURATION_SECS: f64 = 3.0;

/// Default output frame rate.
pub const DEFAULT_FPS: u32 = 24;

/// Hard ceiling on clip duration to keep a single generation bounded.
pub const MAX_DURATION_SECS: f64 = 30.0;

/// Highest frame rate the pipeline will be asked for.
pub const MAX_FPS: u32 = 60;

/// Upper end of the pipeline's internal motion-magnitude range.
/// A normalized strength in `0.0..=1.0` is scaled into `0..=255`.
const MOTION_BUCKET_MAX: u32 = 255;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Caller-supplied knobs for one generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Normalized motion strength, `0.0..=1.0`.
    pub motion_strength: f64,
    /// Clip duration in seconds.
    pub duration_secs: f64,
    /// Output frame rate.
    pub fps: u32,
    /// Optional RNG seed for reproducible output.
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            motion_strength: DEFAULT_MOTION_STRENGTH,
            duration_secs: DEFAULT_DURATION_SECS,
            fps: DEFAULT_FPS,
            seed: None,
        }
    }
}

impl GenerationParams {
    /// Validate all fields against their documented bounds.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.motion_strength) {
            return Err(CoreError::Validation(format!(
                "motion_strength must be in 0.0..=1.0 (got {})",
                self.motion_strength
            )));
        }
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(CoreError::Validation(format!(
                "duration must be greater than 0 (got {})",
                self.duration_secs
            )));
        }
        if self.duration_secs > MAX_DURATION_SECS {
            return Err(CoreError::Validation(format!(
                "duration must not exceed {MAX_DURATION_SECS} seconds (got {})",
                self.duration_secs
            )));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(CoreError::Validation(format!(
                "fps must be in 1..={MAX_FPS} (got {})",
                self.fps
            )));
        }
        Ok(())
    }

    /// Number of frames requested from the pipeline:
    /// `round(duration * fps)`, never less than 1.
    pub fn frame_count(&self) -> u32 {
        let raw = (self.duration_secs * self.fps as f64).round() as u32;
        raw.max(1)
    }

    /// Scale the normalized motion strength into the pipeline's
    /// motion-bucket range (`0..=255`).
    pub fn motion_bucket_id(&self) -> u32 {
        ((self.motion_strength * MOTION_BUCKET_MAX as f64) as u32).min(MOTION_BUCKET_MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
