//! Lifecycle of the caption index.
//!
//! [`IndexManager`] exclusively owns the index handle. Callers never hold on
//! to a tantivy reader: every read goes through [`IndexManager::snapshot`],
//! which opens a fresh reader against the latest commit, and every write goes
//! through a single-use [`BatchWriter`] obtained from
//! [`IndexManager::open_writer`]. At most one writer exists at a time.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    Searcher,
    TantivyDocument,
    TantivyError,
    collector::TopDocs,
    doc,
    query::Query,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{
    document::{Document, MediaKind},
    error::{Error, Result},
};

/// Field names used in the schema.
pub mod fields {
    pub const CAPTION: &str = "caption";
    pub const FILENAME: &str = "filename";
    pub const TYPE: &str = "type";
    pub const TIMESTAMP: &str = "timestamp";
    pub const MODIFIED_TIME: &str = "modified_time";
}

/// Memory budget handed to each short-lived writer.
pub const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// Resolved field handles for the schema.
#[derive(Clone, Copy, Debug)]
pub struct SchemaFields {
    pub caption: Field,
    pub filename: Field,
    pub kind: Field,
    pub timestamp: Field,
    pub modified_time: Field,
}

/// Where the index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    Disk(PathBuf),
    Memory,
}

/// A stored document as read back from a snapshot.
#[derive(Debug, Clone)]
pub struct StoredHit {
    pub score: f32,
    pub caption: String,
    pub filename: String,
    pub kind: MediaKind,
    pub timestamp: u64,
    pub modified_time: u64,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let caption_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let caption = builder.add_text_field(fields::CAPTION, caption_opts);
    let filename = builder.add_text_field(fields::FILENAME, STRING | STORED);
    let kind = builder.add_text_field(fields::TYPE, STRING | STORED);
    let timestamp = builder.add_u64_field(fields::TIMESTAMP, STORED | FAST);
    let modified_time =
        builder.add_u64_field(fields::MODIFIED_TIME, STORED | FAST);

    let schema = builder.build();
    let fields = SchemaFields {
        caption,
        filename,
        kind,
        timestamp,
        modified_time,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

fn mmap_dir(dir: &Path) -> Result<tantivy::directory::MmapDirectory> {
    tantivy::directory::MmapDirectory::open(dir)
        .map_err(|e| TantivyError::SystemError(e.to_string()).into())
}

/// Destroy whatever is at `location` and create an empty index there.
fn fresh_index(location: &IndexLocation) -> Result<Index> {
    let (schema, _) = build_schema();
    let index = match location {
        IndexLocation::Disk(dir) => {
            if dir.exists() {
                tracing::info!(
                    path = %dir.display(),
                    "removing existing index"
                );
                std::fs::remove_dir_all(dir)?;
            }
            std::fs::create_dir_all(dir)?;
            Index::create(
                mmap_dir(dir)?,
                schema,
                tantivy::IndexSettings::default(),
            )?
        }
        IndexLocation::Memory => Index::create_in_ram(schema),
    };
    register_tokenizers(&index);
    Ok(index)
}

/// Owner of the caption index.
pub struct IndexManager {
    location: IndexLocation,
    index: Index,
    fields: SchemaFields,
    writer_open: AtomicBool,
}

impl IndexManager {
    /// Create an empty index at `location`, destroying any previous state.
    pub fn create(location: IndexLocation) -> Result<Self> {
        let index = fresh_index(&location)?;
        let (_, fields) = build_schema();
        Ok(Self {
            location,
            index,
            fields,
            writer_open: AtomicBool::new(false),
        })
    }

    /// Create an empty in-memory index (for tests and ephemeral use).
    pub fn in_memory() -> Result<Self> {
        Self::create(IndexLocation::Memory)
    }

    /// Open the index left on disk by a previous run, without rebuilding.
    /// Creates an empty one if none exists.
    pub fn open(dir: &Path) -> Result<Self> {
        let location = IndexLocation::Disk(dir.to_path_buf());
        let exists = dir.is_dir()
            && Index::exists(&mmap_dir(dir)?)
                .map_err(|e| TantivyError::SystemError(e.to_string()))?;
        if !exists {
            return Self::create(location);
        }

        let index = Index::open(mmap_dir(dir)?)?;
        register_tokenizers(&index);
        let (_, fields) = build_schema();
        Ok(Self {
            location,
            index,
            fields,
            writer_open: AtomicBool::new(false),
        })
    }

    /// Delete all index state and start over with an empty, schema-bound
    /// index. Idempotent. Requires exclusive access, so no writer or
    /// snapshot taken through `self` can be outstanding.
    pub fn rebuild(&mut self) -> Result<()> {
        self.index = fresh_index(&self.location)?;
        tracing::info!(location = ?self.location, "index rebuilt");
        Ok(())
    }

    /// Get the resolved field handles.
    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    /// The underlying index, for building queries against its schema and
    /// tokenizers.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Acquire the index's only writer.
    ///
    /// Fails with [`Error::IndexLock`] while another writer is open; callers
    /// should retry later rather than treat this as fatal.
    pub fn open_writer(&self) -> Result<BatchWriter<'_>> {
        if self
            .writer_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::IndexLock);
        }
        let slot = WriterSlot(&self.writer_open);

        let writer: IndexWriter = match self.index.writer(WRITER_MEMORY_BUDGET)
        {
            Ok(writer) => writer,
            // Another process holds the directory lock.
            Err(TantivyError::LockFailure(..)) => return Err(Error::IndexLock),
            Err(e) => return Err(e.into()),
        };

        Ok(BatchWriter {
            writer,
            fields: self.fields,
            slot,
        })
    }

    /// Open a writer, append `batch` and commit. Returns the number of
    /// documents written.
    pub fn commit_batch(&self, batch: &[Document]) -> Result<usize> {
        self.open_writer()?.commit(batch)
    }

    /// A point-in-time view of everything committed so far.
    ///
    /// Opens a new reader on every call; a snapshot never observes commits
    /// made after it was taken, so take a fresh one before each query.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let reader: IndexReader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Snapshot {
            searcher: reader.searcher(),
            fields: self.fields,
        })
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Releases the writer flag when the writer goes away, committed or not.
struct WriterSlot<'a>(&'a AtomicBool);

impl Drop for WriterSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-use writer bound to one commit.
///
/// Dropping it without calling [`BatchWriter::commit`] discards everything
/// added so far.
pub struct BatchWriter<'a> {
    writer: IndexWriter,
    fields: SchemaFields,
    slot: WriterSlot<'a>,
}

impl BatchWriter<'_> {
    /// Append every indexable document in `batch` and commit. Documents with
    /// a blank caption are skipped. On failure nothing from this batch is
    /// visible and the writer is released.
    pub fn commit(self, batch: &[Document]) -> Result<usize> {
        let BatchWriter {
            writer,
            fields,
            slot,
        } = self;
        // The writer must be fully shut down before the slot is released.
        let result = write_and_commit(writer, fields, batch);
        drop(slot);
        result
    }
}

fn write_and_commit(
    mut writer: IndexWriter,
    f: SchemaFields,
    batch: &[Document],
) -> Result<usize> {
    let write_err = |e: TantivyError| Error::IndexWrite(e.to_string());

    let mut added = 0;
    for doc in batch.iter().filter(|d| d.is_indexable()) {
        writer
            .add_document(doc!(
                f.caption => doc.caption.as_str(),
                f.filename => doc.filename.as_str(),
                f.kind => doc.kind.as_str(),
                f.timestamp => doc.timestamp,
                f.modified_time => doc.modified_time,
            ))
            .map_err(write_err)?;
        added += 1;
    }

    writer.commit().map_err(write_err)?;
    writer.wait_merging_threads().map_err(write_err)?;
    Ok(added)
}

/// Disposable read view of the index.
pub struct Snapshot {
    searcher: Searcher,
    fields: SchemaFields,
}

impl Snapshot {
    pub fn num_docs(&self) -> u64 {
        self.searcher.num_docs()
    }

    /// Run `query` and load the stored fields of the top `limit` hits, in
    /// relevance order.
    pub fn search(
        &self,
        query: &dyn Query,
        limit: usize,
    ) -> Result<Vec<StoredHit>> {
        // The collector preallocates for `limit`, which comes from clients.
        let total = usize::try_from(self.num_docs()).unwrap_or(usize::MAX);
        let limit = limit.min(total);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let f = self.fields;
        let top_docs =
            self.searcher.search(query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = self.searcher.doc(doc_address)?;
            results.push(StoredHit {
                score,
                caption: extract_text(&doc, f.caption),
                filename: extract_text(&doc, f.filename),
                kind: extract_text(&doc, f.kind).parse()?,
                timestamp: extract_u64(&doc, f.timestamp),
                modified_time: extract_u64(&doc, f.modified_time),
            });
        }

        Ok(results)
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
