//! Frame-sequence to MP4 encoding with an ordered encoder fallback.
//!
//! The fallback policy is an explicit ordered candidate list: the first
//! candidate whose binary can be spawned is *the* encoder. A candidate
//! that launches but exits non-zero fails the encode outright -- fallback
//! only covers a missing binary, never a bad run.

use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;

/// Encoder binaries tried in order. `avconv` is the libav drop-in used
/// when `ffmpeg` is not installed.
pub const ENCODER_CANDIDATES: &[&str] = &["ffmpeg", "avconv"];

/// Errors from the encoding stage.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// None of the candidate encoder binaries could be spawned.
    #[error("no video encoder available (tried: {tried})")]
    NoEncoderAvailable { tried: String },

    /// The selected encoder ran but exited non-zero.
    #[error("{encoder} failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        encoder: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam for turning a directory of numbered frames into a video file.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Encode `frames_dir/frame_%06d.png` into `output` at `fps`.
    async fn encode(&self, frames_dir: &Path, fps: u32, output: &Path)
        -> Result<(), EncodeError>;
}

/// Subprocess-based encoder with the ordered candidate fallback.
pub struct CommandEncoder {
    candidates: Vec<String>,
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self {
            candidates: ENCODER_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CommandEncoder {
    /// Build an encoder with a custom candidate list (tried in order).
    pub fn with_candidates(candidates: Vec<String>) -> Self {
        Self { candidates }
    }
}

/// Argument list shared by ffmpeg and avconv for a PNG sequence to H.264
/// MP4 encode. `yuv420p` keeps the output playable in browsers.
fn encode_args(frames_dir: &Path, fps: u32, output: &Path) -> Vec<OsString> {
    vec![
        OsString::from("-y"),
        OsString::from("-framerate"),
        OsString::from(fps.to_string()),
        OsString::from("-i"),
        frames_dir.join("frame_%06d.png").into_os_string(),
        OsString::from("-c:v"),
        OsString::from("libx264"),
        OsString::from("-pix_fmt"),
        OsString::from("yuv420p"),
        output.as_os_str().to_os_string(),
    ]
}

#[async_trait]
impl VideoEncoder for CommandEncoder {
    async fn encode(
        &self,
        frames_dir: &Path,
        fps: u32,
        output: &Path,
    ) -> Result<(), EncodeError> {
        let args = encode_args(frames_dir, fps, output);

        for candidate in &self.candidates {
            let result = tokio::process::Command::new(candidate)
                .args(&args)
                .output()
                .await;

            let out = match result {
                Ok(out) => out,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(encoder = %candidate, "Encoder binary not found, trying next candidate");
                    continue;
                }
                Err(e) => return Err(EncodeError::Io(e)),
            };

            if !out.status.success() {
                return Err(EncodeError::ExecutionFailed {
                    encoder: candidate.clone(),
                    exit_code: out.status.code(),
                    stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                });
            }

            tracing::debug!(encoder = %candidate, output = %output.display(), "Video encoded");
            return Ok(());
        }

        Err(EncodeError::NoEncoderAvailable {
            tried: self.candidates.join(", "),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn args_reference_the_frame_pattern_and_output() {
        let args = encode_args(Path::new("/scratch/frames"), 24, Path::new("/out/clip.mp4"));
        let rendered: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(rendered.contains(&"-framerate".to_string()));
        assert!(rendered.contains(&"24".to_string()));
        assert!(rendered.contains(&"/scratch/frames/frame_%06d.png".to_string()));
        assert_eq!(rendered.last().unwrap(), "/out/clip.mp4");
    }

    #[tokio::test]
    async fn all_candidates_missing_reports_every_name() {
        let encoder = CommandEncoder::with_candidates(vec![
            "stillmotion-no-such-encoder-a".into(),
            "stillmotion-no-such-encoder-b".into(),
        ]);

        let err = encoder
            .encode(Path::new("/tmp/frames"), 24, Path::new("/tmp/out.mp4"))
            .await
            .unwrap_err();

        assert_matches!(err, EncodeError::NoEncoderAvailable { ref tried }
            if tried.contains("stillmotion-no-such-encoder-a")
                && tried.contains("stillmotion-no-such-encoder-b"));
    }
}
