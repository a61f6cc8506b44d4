use std::{
    num::NonZeroU64,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{error::Result, frames::FrameExtractor};

/// A discovered media file.
#[derive(Debug, Clone)]
pub struct MediaFile {
    /// Path relative to the media root. Its string form is the document's
    /// `filename`.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as seconds since the Unix epoch.
    pub mtime: u64,
}

impl MediaFile {
    pub fn filename(&self) -> String {
        self.relative_path.to_string_lossy().to_string()
    }
}

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "m4v", "mov", "mkv", "webm", "avi"];

/// Recursively list image files under `root`, sorted by relative path.
pub fn list_images(root: &Path) -> Result<Vec<MediaFile>> {
    discover_files(root, IMAGE_EXTENSIONS)
}

/// Recursively list video files under `root`, sorted by relative path.
pub fn list_videos(root: &Path) -> Result<Vec<MediaFile>> {
    discover_files(root, VIDEO_EXTENSIONS)
}

/// Recursively walk a directory and discover files with one of the given
/// extensions (compared case-insensitively).
///
/// Skips hidden files/directories (names starting with `.`). A subdirectory
/// that cannot be read is logged and skipped; only an unreadable `root`
/// fails the walk.
pub fn discover_files(
    root: &Path,
    extensions: &[&str],
) -> Result<Vec<MediaFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, extensions, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    extensions: &[&str],
    results: &mut Vec<MediaFile>,
) -> Result<()> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %current.display(), "skipping entry: {e}");
                continue;
            }
        };
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        // Skip hidden files and directories.
        if name.starts_with('.') {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();

        if file_type.is_dir() {
            if let Err(e) = walk_dir(root, &path, extensions, results) {
                tracing::warn!(
                    dir = %path.display(),
                    "skipping unreadable directory: {e}"
                );
            }
        } else if file_type.is_symlink() {
            let resolved = match path.canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // Skip broken symlinks
            };
            // Directory symlinks are not followed (cycle prevention).
            if resolved.is_file() && has_extension(&resolved, extensions) {
                results.push(make_media_file(root, &path, &resolved));
            }
        } else if file_type.is_file() && has_extension(&path, extensions) {
            let abs = path.canonicalize().unwrap_or_else(|_| path.clone());
            results.push(make_media_file(root, &path, &abs));
        }
    }

    Ok(())
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
        })
}

fn make_media_file(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> MediaFile {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    let mtime = std::fs::metadata(absolute_path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    MediaFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        mtime,
    }
}

/// Sample offsets for a video of `duration` seconds: `0, I, 2I, ...` for
/// every complete interval, i.e. `floor(duration / I)` samples. A trailing
/// partial interval produces no sample.
pub fn frame_timestamps(
    duration: f64,
    interval: NonZeroU64,
) -> impl Iterator<Item = u64> {
    let step = interval.get();
    let count = sample_count(duration, interval);
    (0..count).map(move |k| k * step)
}

fn sample_count(duration: f64, interval: NonZeroU64) -> u64 {
    if !duration.is_finite() || duration <= 0.0 {
        return 0;
    }
    (duration / interval.get() as f64).floor() as u64
}

/// One sampled video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp: u64,
    pub image: Vec<u8>,
}

/// Lazy, single-pass sequence of frames from one video. Each call to
/// [`FrameSampler::next`] decodes exactly one frame.
pub struct FrameSampler<'a> {
    extractor: &'a dyn FrameExtractor,
    video: PathBuf,
    interval: u64,
    next_index: u64,
    count: u64,
}

impl FrameSampler<'_> {
    pub async fn next(&mut self) -> Option<Result<VideoFrame>> {
        if self.next_index >= self.count {
            return None;
        }
        let timestamp = self.next_index * self.interval;
        self.next_index += 1;

        Some(
            self.extractor
                .frame_at(&self.video, timestamp)
                .await
                .map(|image| VideoFrame { timestamp, image }),
        )
    }

    /// Frames not yet produced.
    pub fn remaining(&self) -> u64 {
        self.count - self.next_index
    }
}

/// Probe `video` and return a sampler over its frames at `interval`.
pub async fn sample_frames<'a>(
    extractor: &'a dyn FrameExtractor,
    video: &Path,
    interval: NonZeroU64,
) -> Result<FrameSampler<'a>> {
    let duration = extractor.duration(video).await?;
    Ok(FrameSampler {
        extractor,
        video: video.to_path_buf(),
        interval: interval.get(),
        next_index: 0,
        count: sample_count(duration, interval),
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::Error;

    fn secs(n: u64) -> NonZeroU64 {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn discovers_images_and_videos_separately() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("cat.jpg"), "x").unwrap();
        std::fs::write(tmp.path().join("dog.PNG"), "x").unwrap();
        std::fs::write(tmp.path().join("clip.mp4"), "x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let images = list_images(tmp.path()).unwrap();
        let names: Vec<_> = images.iter().map(|f| f.filename()).collect();
        assert_eq!(names, vec!["cat.jpg", "dog.PNG"]);

        let videos = list_videos(tmp.path()).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].filename(), "clip.mp4");
    }

    #[test]
    fn skips_hidden_files_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".thumbs");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("a.jpg"), "x").unwrap();
        std::fs::write(tmp.path().join(".b.jpg"), "x").unwrap();
        std::fs::write(tmp.path().join("c.jpg"), "x").unwrap();

        let files = list_images(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename(), "c.jpg");
    }

    #[test]
    fn recurses_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("trip");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("beach.jpg"), "x").unwrap();
        std::fs::write(tmp.path().join("top.jpg"), "x").unwrap();

        let names: Vec<_> = list_images(tmp.path())
            .unwrap()
            .iter()
            .map(|f| f.filename())
            .collect();
        assert_eq!(names, vec!["top.jpg", "trip/beach.jpg"]);
    }

    #[test]
    fn mtime_is_nonzero() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.jpg"), "x").unwrap();
        let files = list_images(tmp.path()).unwrap();
        assert!(files[0].mtime > 0);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_images(&tmp.path().join("nope")).is_err());
    }

    #[test]
    fn timestamps_cover_complete_intervals_only() {
        let ts: Vec<_> = frame_timestamps(12.0, secs(5)).collect();
        assert_eq!(ts, vec![0, 5]);

        let ts: Vec<_> = frame_timestamps(15.0, secs(5)).collect();
        assert_eq!(ts, vec![0, 5, 10]);
    }

    #[test]
    fn timestamp_count_is_floor_of_duration_over_interval() {
        for (duration, interval) in
            [(0.0, 5), (4.9, 5), (5.0, 5), (59.99, 5), (61.0, 7), (3.0, 1)]
        {
            let n = frame_timestamps(duration, secs(interval)).count() as u64;
            assert_eq!(n, (duration / interval as f64).floor() as u64);
        }
    }

    #[test]
    fn degenerate_durations_yield_no_frames() {
        assert_eq!(frame_timestamps(f64::NAN, secs(5)).count(), 0);
        assert_eq!(frame_timestamps(-3.0, secs(5)).count(), 0);
    }

    struct FakeVideo {
        duration: f64,
        fail_at: Option<u64>,
    }

    #[async_trait]
    impl FrameExtractor for FakeVideo {
        async fn duration(&self, _video: &Path) -> Result<f64> {
            Ok(self.duration)
        }

        async fn frame_at(
            &self,
            _video: &Path,
            seconds: u64,
        ) -> Result<Vec<u8>> {
            if self.fail_at == Some(seconds) {
                return Err(Error::FrameExtraction("bad frame".into()));
            }
            Ok(seconds.to_le_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn sampler_yields_frames_lazily() {
        let fake = FakeVideo {
            duration: 11.0,
            fail_at: None,
        };
        let mut sampler = sample_frames(&fake, Path::new("v.mp4"), secs(5))
            .await
            .unwrap();
        assert_eq!(sampler.remaining(), 2);

        let first = sampler.next().await.unwrap().unwrap();
        assert_eq!(first.timestamp, 0);
        assert_eq!(sampler.remaining(), 1);

        let second = sampler.next().await.unwrap().unwrap();
        assert_eq!(second.timestamp, 5);
        assert_eq!(second.image, 5u64.to_le_bytes().to_vec());

        assert!(sampler.next().await.is_none());
    }

    #[tokio::test]
    async fn sampler_surfaces_per_frame_errors() {
        let fake = FakeVideo {
            duration: 10.0,
            fail_at: Some(5),
        };
        let mut sampler = sample_frames(&fake, Path::new("v.mp4"), secs(5))
            .await
            .unwrap();
        assert!(sampler.next().await.unwrap().is_ok());
        assert!(sampler.next().await.unwrap().is_err());
        assert!(sampler.next().await.is_none());
    }

    #[tokio::test]
    async fn zero_duration_video_has_no_frames() {
        let fake = FakeVideo {
            duration: 0.0,
            fail_at: None,
        };
        let mut sampler = sample_frames(&fake, Path::new("v.mp4"), secs(5))
            .await
            .unwrap();
        assert!(sampler.next().await.is_none());
    }
}
