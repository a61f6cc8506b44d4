//! Caption ingestion.
//!
//! A run walks the image root, then the video root, accumulating items
//! (whole images or sampled frames) into batches of at most `batch_size`.
//! Each full batch, and the trailing partial one, is captioned in a single
//! call, deduplicated against everything committed earlier in the run, and
//! committed as one write batch.
//!
//! Bad files and failed batches are logged and skipped; a run never aborts
//! because of one input. Cancellation is honoured only at batch boundaries.

use std::{
    collections::HashSet,
    num::NonZeroU64,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::{sync::OwnedMutexGuard, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    caption::CaptionClient,
    codec,
    document::{Document, MediaKind},
    error::{Error, Result},
    frames::FrameExtractor,
    index::IndexManager,
    settings::Settings,
    walker::{self, MediaFile},
};

/// Attempts made to commit one batch before it is reported as failed.
pub const COMMIT_ATTEMPTS: u32 = 3;

/// Back-off unit between commit attempts; attempt `k` waits `k` units.
pub const COMMIT_BACKOFF: Duration = Duration::from_millis(200);

/// Where a run is in its walk.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    #[default]
    Idle,
    Walking,
    Batching,
    Captioning,
    Deduplicating,
    Committing,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_failed: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub documents_indexed: usize,
    pub duplicates_dropped: usize,
    pub captions_missing: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub images_dir: PathBuf,
    pub videos_dir: PathBuf,
    pub batch_size: usize,
    pub frame_interval: NonZeroU64,
}

impl From<&Settings> for IngestOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            images_dir: settings.images_dir.clone(),
            videos_dir: settings.videos_dir.clone(),
            batch_size: settings.batch_size,
            frame_interval: settings.frame_interval,
        }
    }
}

/// Everything about a pending item except its pixels.
#[derive(Debug, Clone)]
struct ItemMeta {
    filename: String,
    kind: MediaKind,
    timestamp: u64,
    modified_time: u64,
}

#[derive(Default)]
struct PendingBatch {
    items: Vec<ItemMeta>,
    images: Vec<Vec<u8>>,
}

impl PendingBatch {
    fn push(&mut self, meta: ItemMeta, image: Vec<u8>) {
        self.items.push(meta);
        self.images.push(image);
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Drives walker, caption client and index for ingestion runs.
pub struct IngestionCoordinator {
    index: Arc<IndexManager>,
    captioner: Arc<dyn CaptionClient>,
    extractor: Arc<dyn FrameExtractor>,
    options: IngestOptions,
    run_lock: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<IngestState>,
    last_report: Mutex<Option<IngestReport>>,
}

impl IngestionCoordinator {
    pub fn new(
        index: Arc<IndexManager>,
        captioner: Arc<dyn CaptionClient>,
        extractor: Arc<dyn FrameExtractor>,
        options: IngestOptions,
    ) -> Self {
        Self {
            index,
            captioner,
            extractor,
            options,
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(IngestState::Idle),
            last_report: Mutex::new(None),
        }
    }

    pub fn state(&self) -> IngestState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report of the most recently finished run, if any.
    pub fn last_report(&self) -> Option<IngestReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one ingestion pass to completion.
    ///
    /// Fails with [`Error::IngestionRunning`] if another run holds the
    /// coordinator; every other failure is absorbed into the report.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let guard = self.acquire()?;
        Ok(self.run_locked(guard, cancel).await)
    }

    /// Start a run in the background. The check for a concurrent run happens
    /// before this returns.
    pub fn spawn(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<IngestReport>> {
        let guard = self.acquire()?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(
            async move { this.run_locked(guard, &cancel).await },
        ))
    }

    fn acquire(&self) -> Result<OwnedMutexGuard<()>> {
        Arc::clone(&self.run_lock)
            .try_lock_owned()
            .map_err(|_| Error::IngestionRunning)
    }

    async fn run_locked(
        &self,
        _guard: OwnedMutexGuard<()>,
        cancel: &CancellationToken,
    ) -> IngestReport {
        tracing::info!(
            images = %self.options.images_dir.display(),
            videos = %self.options.videos_dir.display(),
            batch_size = self.options.batch_size,
            "ingestion started"
        );

        let mut run = Run {
            coordinator: self,
            cancel,
            pending: PendingBatch::default(),
            seen: HashSet::new(),
            report: IngestReport::default(),
        };
        run.ingest_images().await;
        run.ingest_videos().await;
        run.flush().await;

        let report = run.report;
        self.set_state(IngestState::Idle);
        tracing::info!(
            files = report.files_seen,
            failed_files = report.files_failed,
            batches = report.batches_committed,
            failed_batches = report.batches_failed,
            documents = report.documents_indexed,
            duplicates = report.duplicates_dropped,
            cancelled = report.cancelled,
            "ingestion finished"
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    fn set_state(&self, next: IngestState) {
        let mut state =
            self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "ingestion state");
            *state = next;
        }
    }
}

/// State of a single run.
struct Run<'a> {
    coordinator: &'a IngestionCoordinator,
    cancel: &'a CancellationToken,
    pending: PendingBatch,
    /// `(caption, filename)` pairs committed so far in this run.
    seen: HashSet<(String, String)>,
    report: IngestReport,
}

impl Run<'_> {
    fn stopped(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            self.report.cancelled = true;
        }
        self.report.cancelled
    }

    async fn ingest_images(&mut self) {
        let c = self.coordinator;
        c.set_state(IngestState::Walking);
        let files = match walker::list_images(&c.options.images_dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(
                    root = %c.options.images_dir.display(),
                    "skipping image root: {e}"
                );
                return;
            }
        };
        tracing::debug!(count = files.len(), "discovered images");

        // Decode in chunks so at most one batch of pixels is in flight.
        for chunk in files.chunks(c.options.batch_size) {
            if self.stopped() {
                return;
            }
            self.report.files_seen += chunk.len();
            let loaded = match load_images(chunk.to_vec()).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!("image decoding task failed: {e}");
                    self.report.files_failed += chunk.len();
                    continue;
                }
            };

            for (file, image) in loaded {
                match image {
                    Ok(png) => {
                        let meta = ItemMeta {
                            filename: file.filename(),
                            kind: MediaKind::Image,
                            timestamp: 0,
                            modified_time: file.mtime,
                        };
                        self.push(meta, png).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            file = %file.relative_path.display(),
                            "skipping image: {e}"
                        );
                        self.report.files_failed += 1;
                    }
                }
            }
        }
    }

    async fn ingest_videos(&mut self) {
        let c = self.coordinator;
        c.set_state(IngestState::Walking);
        let files = match walker::list_videos(&c.options.videos_dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(
                    root = %c.options.videos_dir.display(),
                    "skipping video root: {e}"
                );
                return;
            }
        };
        tracing::debug!(count = files.len(), "discovered videos");

        for file in files {
            if self.stopped() {
                return;
            }
            self.report.files_seen += 1;
            if let Err(e) = self.ingest_video(&file).await {
                tracing::warn!(
                    file = %file.relative_path.display(),
                    "skipping rest of video: {e}"
                );
                self.report.files_failed += 1;
            }
        }
    }

    /// Frames already queued stay queued if a later frame fails.
    async fn ingest_video(&mut self, file: &MediaFile) -> Result<()> {
        let c = self.coordinator;
        let mut sampler = walker::sample_frames(
            c.extractor.as_ref(),
            &file.absolute_path,
            c.options.frame_interval,
        )
        .await?;
        if sampler.remaining() == 0 {
            tracing::debug!(
                file = %file.relative_path.display(),
                "video too short to sample"
            );
            return Ok(());
        }

        let filename = file.filename();
        while let Some(frame) = sampler.next().await {
            let frame = frame?;
            let timestamp = frame.timestamp;
            let png = blocking(move || codec::normalize_image(&frame.image))
                .await??;
            let meta = ItemMeta {
                filename: filename.clone(),
                kind: MediaKind::Video,
                timestamp,
                modified_time: file.mtime,
            };
            self.push(meta, png).await;
            if self.stopped() {
                break;
            }
        }
        Ok(())
    }

    async fn push(&mut self, meta: ItemMeta, image: Vec<u8>) {
        self.coordinator.set_state(IngestState::Batching);
        self.pending.push(meta, image);
        if self.pending.len() >= self.coordinator.options.batch_size {
            self.flush().await;
        }
    }

    /// Caption, deduplicate and commit whatever is pending.
    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        if self.stopped() {
            tracing::debug!(items = batch.len(), "discarding batch on cancel");
            return;
        }

        let c = self.coordinator;
        c.set_state(IngestState::Captioning);
        let captions = match c.captioner.caption(&batch.images).await {
            Ok(captions) => captions,
            Err(e) => {
                tracing::warn!(items = batch.len(), "skipping batch: {e}");
                self.report.batches_failed += 1;
                c.set_state(IngestState::Walking);
                return;
            }
        };
        if captions.len() < batch.len() {
            let missing = batch.len() - captions.len();
            tracing::warn!(missing, "caption service returned a short batch");
            self.report.captions_missing += missing;
        }

        c.set_state(IngestState::Deduplicating);
        let outcome =
            dedup_batch(&self.seen, batch.items.into_iter().zip(captions));
        self.report.duplicates_dropped += outcome.duplicates;
        self.report.captions_missing += outcome.blank;

        if outcome.documents.is_empty() {
            c.set_state(IngestState::Walking);
            return;
        }

        c.set_state(IngestState::Committing);
        let keys: Vec<_> = outcome
            .documents
            .iter()
            .map(|d| (d.caption.clone(), d.filename.clone()))
            .collect();
        match commit_with_retry(&c.index, outcome.documents).await {
            Ok(written) => {
                tracing::debug!(documents = written, "batch committed");
                self.report.batches_committed += 1;
                self.report.documents_indexed += written;
                self.seen.extend(keys);
            }
            Err(e) => {
                tracing::error!("batch commit failed: {e}");
                self.report.batches_failed += 1;
            }
        }
        c.set_state(IngestState::Walking);
    }
}

#[derive(Debug, Default)]
struct DedupOutcome {
    documents: Vec<Document>,
    duplicates: usize,
    blank: usize,
}

/// Turn captioned items into documents, dropping blank captions and any
/// `(caption, filename)` pair already in `seen` or earlier in the batch.
/// The first occurrence wins, so its timestamp is the one kept.
fn dedup_batch(
    seen: &HashSet<(String, String)>,
    captioned: impl IntoIterator<Item = (ItemMeta, String)>,
) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let mut in_batch = HashSet::new();

    for (meta, caption) in captioned {
        let caption = caption.trim().to_string();
        if caption.is_empty() {
            outcome.blank += 1;
            continue;
        }
        let key = (caption, meta.filename);
        if seen.contains(&key) || !in_batch.insert(key.clone()) {
            outcome.duplicates += 1;
            continue;
        }
        let (caption, filename) = key;
        outcome.documents.push(Document {
            caption,
            filename,
            kind: meta.kind,
            timestamp: meta.timestamp,
            modified_time: meta.modified_time,
        });
    }

    outcome
}

async fn commit_with_retry(
    index: &Arc<IndexManager>,
    documents: Vec<Document>,
) -> Result<usize> {
    let documents = Arc::new(documents);
    let mut attempt = 1;
    loop {
        let index = Arc::clone(index);
        let batch = Arc::clone(&documents);
        match blocking(move || index.commit_batch(&batch)).await? {
            Err(e) if e.is_retryable() && attempt < COMMIT_ATTEMPTS => {
                tracing::warn!(attempt, "commit failed, retrying: {e}");
                tokio::time::sleep(COMMIT_BACKOFF * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Read and normalize images on the blocking pool, in parallel.
async fn load_images(
    files: Vec<MediaFile>,
) -> Result<Vec<(MediaFile, Result<Vec<u8>>)>> {
    blocking(move || {
        files
            .into_par_iter()
            .map(|file| {
                let png = std::fs::read(&file.absolute_path)
                    .map_err(Error::from)
                    .and_then(|bytes| codec::normalize_image(&bytes));
                (file, png)
            })
            .collect()
    })
    .await
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use tantivy::query::AllQuery;

    use super::*;

    /// Captions each image "caption N" with a run-wide counter.
    #[derive(Default)]
    struct Counting {
        next: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CaptionClient for Counting {
        async fn caption(&self, images: &[Vec<u8>]) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(images
                .iter()
                .map(|_| {
                    let n = self.next.fetch_add(1, Ordering::SeqCst);
                    format!("caption {n}")
                })
                .collect())
        }
    }

    /// Same caption for everything.
    struct Fixed(&'static str);

    #[async_trait]
    impl CaptionClient for Fixed {
        async fn caption(&self, images: &[Vec<u8>]) -> Result<Vec<String>> {
            Ok(vec![self.0.to_string(); images.len()])
        }
    }

    /// Fails the first call, then behaves like [`Counting`].
    #[derive(Default)]
    struct FailFirst {
        inner: Counting,
        failed: AtomicUsize,
    }

    #[async_trait]
    impl CaptionClient for FailFirst {
        async fn caption(&self, images: &[Vec<u8>]) -> Result<Vec<String>> {
            if self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Error::CaptionService("model is loading".into()));
            }
            self.inner.caption(images).await
        }
    }

    /// Returns one caption fewer than requested.
    struct Short;

    #[async_trait]
    impl CaptionClient for Short {
        async fn caption(&self, images: &[Vec<u8>]) -> Result<Vec<String>> {
            Ok((1..images.len()).map(|i| format!("frame {i}")).collect())
        }
    }

    /// Every video lasts `duration` seconds; frames are tiny PNGs.
    struct FakeVideos {
        duration: f64,
    }

    #[async_trait]
    impl FrameExtractor for FakeVideos {
        async fn duration(&self, _video: &Path) -> Result<f64> {
            Ok(self.duration)
        }

        async fn frame_at(
            &self,
            _video: &Path,
            _seconds: u64,
        ) -> Result<Vec<u8>> {
            Ok(codec::tiny_png())
        }
    }

    struct Fixture {
        tmp: tempfile::TempDir,
        index: Arc<IndexManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            std::fs::create_dir(tmp.path().join("images")).unwrap();
            std::fs::create_dir(tmp.path().join("videos")).unwrap();
            Self {
                tmp,
                index: Arc::new(IndexManager::in_memory().unwrap()),
            }
        }

        fn add_image(&self, name: &str) {
            let path = self.tmp.path().join("images").join(name);
            std::fs::write(path, codec::tiny_png()).unwrap();
        }

        fn add_video(&self, name: &str) {
            let path = self.tmp.path().join("videos").join(name);
            std::fs::write(path, "v").unwrap();
        }

        fn coordinator(
            &self,
            captioner: Arc<dyn CaptionClient>,
            duration: f64,
            batch_size: usize,
        ) -> IngestionCoordinator {
            IngestionCoordinator::new(
                Arc::clone(&self.index),
                captioner,
                Arc::new(FakeVideos { duration }),
                IngestOptions {
                    images_dir: self.tmp.path().join("images"),
                    videos_dir: self.tmp.path().join("videos"),
                    batch_size,
                    frame_interval: NonZeroU64::new(5).unwrap(),
                },
            )
        }

        fn documents(&self) -> Vec<crate::index::StoredHit> {
            self.index.snapshot().unwrap().search(&AllQuery, 1000).unwrap()
        }
    }

    fn meta(filename: &str, timestamp: u64) -> ItemMeta {
        ItemMeta {
            filename: filename.to_string(),
            kind: MediaKind::Video,
            timestamp,
            modified_time: 0,
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let outcome = dedup_batch(
            &HashSet::new(),
            vec![
                (meta("a.mp4", 0), "a cat".to_string()),
                (meta("a.mp4", 5), " a cat ".to_string()),
                (meta("b.mp4", 0), "a cat".to_string()),
            ],
        );
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.documents.len(), 2);
        assert_eq!(outcome.documents[0].timestamp, 0);
        assert_eq!(outcome.documents[1].filename, "b.mp4");
    }

    #[test]
    fn dedup_respects_earlier_batches_and_drops_blanks() {
        let seen = HashSet::from([("a cat".to_string(), "a.mp4".to_string())]);
        let outcome = dedup_batch(
            &seen,
            vec![
                (meta("a.mp4", 10), "a cat".to_string()),
                (meta("a.mp4", 15), "   ".to_string()),
                (meta("a.mp4", 20), "a dog".to_string()),
            ],
        );
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.blank, 1);
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.documents[0].caption, "a dog");
    }

    #[tokio::test]
    async fn every_image_becomes_one_document() {
        let fx = Fixture::new();
        for name in ["a.jpg", "b.png", "c.webp"] {
            fx.add_image(name);
        }
        let captioner = Arc::new(Counting::default());
        let coordinator = fx.coordinator(captioner.clone(), 0.0, 2);

        let report = coordinator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.files_seen, 3);
        assert_eq!(report.documents_indexed, 3);
        // Two full-or-partial flushes: [a, b] and the trailing [c].
        assert_eq!(report.batches_committed, 2);
        assert_eq!(captioner.calls.load(Ordering::SeqCst), 2);

        let docs = fx.documents();
        assert_eq!(docs.len(), 3);
        assert!(docs.iter().all(|d| d.kind == MediaKind::Image));
        assert!(docs.iter().all(|d| d.timestamp == 0));
        assert!(docs.iter().all(|d| d.modified_time > 0));
    }

    #[tokio::test]
    async fn repeated_captions_within_a_video_collapse() {
        let fx = Fixture::new();
        fx.add_video("clip.mp4");
        // 22s at 5s intervals: frames at 0, 5, 10, 15.
        let coordinator = fx.coordinator(Arc::new(Fixed("a beach")), 22.0, 3);

        let report = coordinator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.documents_indexed, 1);
        assert_eq!(report.duplicates_dropped, 3);
        let docs = fx.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].filename, "clip.mp4");
        assert_eq!(docs[0].kind, MediaKind::Video);
        assert_eq!(docs[0].timestamp, 0);
    }

    #[tokio::test]
    async fn failed_batch_does_not_stop_later_batches() {
        let fx = Fixture::new();
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            fx.add_image(name);
        }
        let coordinator =
            fx.coordinator(Arc::new(FailFirst::default()), 0.0, 1);

        let report = coordinator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.batches_committed, 2);
        let mut names: Vec<_> =
            fx.documents().into_iter().map(|d| d.filename).collect();
        names.sort();
        assert_eq!(names, vec!["b.jpg", "c.jpg"]);
    }

    #[tokio::test]
    async fn zero_duration_video_contributes_nothing() {
        let fx = Fixture::new();
        fx.add_video("empty.mp4");
        let coordinator = fx.coordinator(Arc::new(Counting::default()), 0.0, 4);

        let report = coordinator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.files_seen, 1);
        assert_eq!(report.files_failed, 0);
        assert_eq!(report.documents_indexed, 0);
        assert_eq!(report.batches_committed, 0);
    }

    #[tokio::test]
    async fn corrupt_image_is_skipped() {
        let fx = Fixture::new();
        fx.add_image("good.jpg");
        std::fs::write(fx.tmp.path().join("images/bad.jpg"), "not an image")
            .unwrap();
        let coordinator = fx.coordinator(Arc::new(Counting::default()), 0.0, 4);

        let report = coordinator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.files_seen, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.documents_indexed, 1);
        assert_eq!(fx.documents()[0].filename, "good.jpg");
    }

    #[tokio::test]
    async fn missing_roots_are_not_fatal() {
        let fx = Fixture::new();
        std::fs::remove_dir(fx.tmp.path().join("images")).unwrap();
        fx.add_video("clip.mp4");
        let coordinator =
            fx.coordinator(Arc::new(Counting::default()), 10.0, 4);

        let report = coordinator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.documents_indexed, 2);
    }

    #[tokio::test]
    async fn short_caption_response_counts_missing() {
        let fx = Fixture::new();
        fx.add_video("clip.mp4");
        let coordinator = fx.coordinator(Arc::new(Short), 15.0, 3);

        let report = coordinator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.captions_missing, 1);
        assert_eq!(report.documents_indexed, 2);
        let mut timestamps: Vec<_> =
            fx.documents().into_iter().map(|d| d.timestamp).collect();
        timestamps.sort_unstable();
        // Captions line up with the leading frames.
        assert_eq!(timestamps, vec![0, 5]);
    }

    #[tokio::test]
    async fn cancelled_run_commits_nothing() {
        let fx = Fixture::new();
        fx.add_image("a.jpg");
        fx.add_video("clip.mp4");
        let coordinator =
            fx.coordinator(Arc::new(Counting::default()), 20.0, 2);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = coordinator.run(&cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches_committed, 0);
        assert!(fx.documents().is_empty());
        assert_eq!(coordinator.state(), IngestState::Idle);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let fx = Fixture::new();
        let coordinator = fx.coordinator(Arc::new(Counting::default()), 0.0, 2);

        let _held = coordinator.acquire().unwrap();
        let err = coordinator
            .run(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IngestionRunning));
    }

    #[tokio::test]
    async fn locked_index_fails_the_batch_after_retries() {
        let fx = Fixture::new();
        fx.add_image("a.jpg");
        let coordinator = fx.coordinator(Arc::new(Counting::default()), 0.0, 2);

        let writer = fx.index.open_writer().unwrap();
        let report = coordinator.run(&CancellationToken::new()).await.unwrap();
        drop(writer);

        assert_eq!(report.batches_failed, 1);
        assert_eq!(report.documents_indexed, 0);
    }

    #[tokio::test]
    async fn spawned_run_records_its_report() {
        let fx = Fixture::new();
        fx.add_image("a.jpg");
        let coordinator =
            Arc::new(fx.coordinator(Arc::new(Counting::default()), 0.0, 2));
        assert!(coordinator.last_report().is_none());

        let handle = coordinator.spawn(CancellationToken::new()).unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.documents_indexed, 1);
        assert_eq!(coordinator.last_report(), Some(report));
        assert_eq!(coordinator.state(), IngestState::Idle);
    }
}
