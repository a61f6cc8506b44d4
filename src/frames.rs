//! Video probing and frame extraction.
//!
//! The production implementation shells out to `ffprobe` (duration) and
//! `ffmpeg` (one PNG frame per call, piped over stdout).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Source of video metadata and decoded frames.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Duration of the video in seconds.
    async fn duration(&self, video: &Path) -> Result<f64>;

    /// The frame shown at `seconds`, as encoded image bytes.
    async fn frame_at(&self, video: &Path, seconds: u64) -> Result<Vec<u8>>;
}

/// [`FrameExtractor`] backed by the ffmpeg command-line tools.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(
        ffmpeg: impl Into<PathBuf>,
        ffprobe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

#[async_trait]
impl FrameExtractor for Ffmpeg {
    async fn duration(&self, video: &Path) -> Result<f64> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(video)
            .output()
            .await
            .map_err(|e| {
                Error::FrameExtraction(format!(
                    "could not run {}: {e}",
                    self.ffprobe.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::FrameExtraction(format!(
                "ffprobe failed on {}: {}",
                video.display(),
                stderr.trim()
            )));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn frame_at(&self, video: &Path, seconds: u64) -> Result<Vec<u8>> {
        // -ss before -i for fast seeking.
        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss", &seconds.to_string(), "-i"])
            .arg(video)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .output()
            .await
            .map_err(|e| {
                Error::FrameExtraction(format!(
                    "could not run {}: {e}",
                    self.ffmpeg.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::FrameExtraction(format!(
                "ffmpeg failed on {} at {seconds}s: {}",
                video.display(),
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(Error::FrameExtraction(format!(
                "no frame in {} at {seconds}s",
                video.display()
            )));
        }

        Ok(output.stdout)
    }
}

/// Extract `format.duration` from `ffprobe -print_format json` output.
fn parse_duration(json_str: &str) -> Result<f64> {
    let json: serde_json::Value = serde_json::from_str(json_str)?;

    let duration = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| {
            Error::FrameExtraction("ffprobe reported no duration".into())
        })?;

    if duration.is_finite() && duration > 0.0 {
        Ok(duration)
    } else {
        Ok(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_duration() {
        let json =
            r#"{"format": {"filename": "a.mp4", "duration": "12.480000"}}"#;
        assert!((parse_duration(json).unwrap() - 12.48).abs() < 1e-9);
    }

    #[test]
    fn missing_duration_is_an_error() {
        let json = r#"{"format": {"filename": "a.mp4"}}"#;
        assert!(matches!(
            parse_duration(json),
            Err(Error::FrameExtraction(_))
        ));
    }

    #[test]
    fn negative_duration_clamps_to_zero() {
        let json = r#"{"format": {"duration": "-1.0"}}"#;
        assert_eq!(parse_duration(json).unwrap(), 0.0);
    }

    #[test]
    fn malformed_probe_output_is_an_error() {
        assert!(parse_duration("not json").is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_frame_extraction_error() {
        let ffmpeg = Ffmpeg::new(
            "/nonexistent/mediasearch-ffmpeg",
            "/nonexistent/mediasearch-ffprobe",
        );
        let err = ffmpeg.duration(Path::new("clip.mp4")).await.unwrap_err();
        assert!(matches!(err, Error::FrameExtraction(_)));
        let err = ffmpeg
            .frame_at(Path::new("clip.mp4"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FrameExtraction(_)));
    }
}
