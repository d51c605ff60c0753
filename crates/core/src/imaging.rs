//! Aspect-preserving fit-to-cap math for input images.
//!
//! Large inputs are downscaled before generation so a single image fits the
//! device memory budget. Only the math lives here; actual decode and
//! resampling happen in the pipeline crate.

use crate::error::CoreError;

/// Largest width or height fed to the pipeline. Inputs above this cap are
/// downscaled, preserving aspect ratio.
pub const MAX_INPUT_DIMENSION: u32 = 768;

/// Compute the target size for an image under a dimension cap.
///
/// Returns `None` when the image already fits (no resize needed).
/// Otherwise both dimensions are scaled by `cap / max(width, height)`,
/// truncating like the original preprocessing, and clamped to at least 1px.
pub fn fit_within(width: u32, height: u32, cap: u32) -> Option<(u32, u32)> {
    let largest = width.max(height);
    if largest <= cap {
        return None;
    }
    let ratio = cap as f64 / largest as f64;
    let new_w = ((width as f64 * ratio) as u32).max(1);
    let new_h = ((height as f64 * ratio) as u32).max(1);
    Some((new_w, new_h))
}

/// Validate that decoded image dimensions are usable.
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), CoreError> {
    if width == 0 || height == 0 {
        return Err(CoreError::Validation(
            "Image has a zero dimension".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
