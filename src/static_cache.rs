use std::{
    num::NonZeroUsize,
    path::{Component, Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use axum::body::Bytes;
use lru::LruCache;
use tokio::{fs::File, io::AsyncReadExt};

use crate::error::{Error, Result};

/// Files larger than this are streamed from disk and never cached.
pub const MAX_CACHED_FILE: u64 = 4 * 1024 * 1024;

/// Upper bound on the bytes held by one cache.
pub const MAX_CACHED_BYTES: u64 = 64 * 1024 * 1024;

/// A small file held in memory.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub bytes: Bytes,
    pub content_type: String,
}

/// What [`StaticCache::get`] hands back for a path.
#[derive(Debug)]
pub enum ServedFile {
    Cached(CachedFile),
    /// Too large to keep in memory; the caller streams it.
    Streamed { file: File, content_type: String },
}

impl ServedFile {
    pub fn content_type(&self) -> &str {
        match self {
            ServedFile::Cached(f) => &f.content_type,
            ServedFile::Streamed { content_type, .. } => content_type,
        }
    }
}

struct Entries {
    lru: LruCache<String, CachedFile>,
    bytes: u64,
}

impl Entries {
    fn insert(&mut self, path: String, file: CachedFile, budget: u64) {
        self.bytes += file.bytes.len() as u64;
        if let Some((_, old)) = self.lru.push(path, file) {
            self.bytes -= old.bytes.len() as u64;
        }
        while self.bytes > budget {
            match self.lru.pop_lru() {
                Some((_, old)) => self.bytes -= old.bytes.len() as u64,
                None => break,
            }
        }
    }
}

/// Serves files under one media root, keeping the most recently used small
/// ones in memory. Bounded by entry count and by total bytes; the least
/// recently used entries go first.
pub struct StaticCache {
    root: PathBuf,
    max_file: u64,
    max_bytes: u64,
    entries: Mutex<Entries>,
}

impl StaticCache {
    pub fn new(root: impl Into<PathBuf>, capacity: usize) -> Self {
        Self::with_limits(root, capacity, MAX_CACHED_FILE, MAX_CACHED_BYTES)
    }

    pub fn with_limits(
        root: impl Into<PathBuf>,
        capacity: usize,
        max_file: u64,
        max_bytes: u64,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            root: root.into(),
            max_file: max_file.min(max_bytes),
            max_bytes,
            entries: Mutex::new(Entries {
                lru: LruCache::new(capacity),
                bytes: 0,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetch `path` (relative to the root) from the cache or from disk.
    /// Only successful reads of small files are cached.
    pub async fn get(&self, path: &str) -> Result<ServedFile> {
        let cached = self.lock().lru.get(path).cloned();
        if let Some(hit) = cached {
            return Ok(ServedFile::Cached(hit));
        }

        let full = self.resolve(path)?;
        let mut file = match File::open(&full).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found(path));
            }
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(not_found(path));
        }
        let content_type = mime_guess::from_path(&full)
            .first_or_octet_stream()
            .to_string();

        if meta.len() > self.max_file {
            tracing::debug!(path, size = meta.len(), "streaming large file");
            return Ok(ServedFile::Streamed { file, content_type });
        }

        let mut bytes = Vec::with_capacity(meta.len() as usize);
        file.read_to_end(&mut bytes).await?;
        let cached = CachedFile {
            bytes: Bytes::from(bytes),
            content_type,
        };
        self.lock()
            .insert(path.to_string(), cached.clone(), self.max_bytes);
        Ok(ServedFile::Cached(cached))
    }

    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lru.is_empty()
    }

    /// Bytes currently held in memory.
    pub fn cached_bytes(&self) -> u64 {
        self.lock().bytes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join `path` onto the root, refusing anything that could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !plain {
            return Err(not_found(path));
        }
        Ok(self.root.join(relative))
    }
}

fn not_found(path: &str) -> Error {
    Error::NotFound {
        kind: "file",
        name: path.to_string(),
    }
}
