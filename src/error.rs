use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("could not open database: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("caption service error: {0}")]
    CaptionService(String),

    #[error("frame extraction failed: {0}")]
    FrameExtraction(String),

    #[error("another index writer is already open")]
    IndexLock,

    #[error("index commit failed: {0}")]
    IndexWrite(String),

    #[error("{0}")]
    QueryParse(String),

    #[error("query timed out after {0} ms")]
    QueryTimeout(u64),

    #[error("an ingestion run is already in progress")]
    IngestionRunning,
}

impl Error {
    /// Whether a failed batch commit is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::IndexLock | Error::IndexWrite(_))
    }
}
