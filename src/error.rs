use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

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

    #[error("invalid TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("invalid TOML document: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("work directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("no ingestible files found under {dir}")]
    EmptyCorpus { dir: PathBuf },

    #[error(
        "feature store not initialized: {path} does not exist, run initialization first"
    )]
    StoreNotInitialized { path: PathBuf },

    #[error("retrieval pipeline is not ready: load the feature store first")]
    PipelineNotReady,

    #[error("{capability} failed: {message}")]
    Capability {
        capability: &'static str,
        message: String,
    },

    #[error("{capability} call timed out after {after:?}")]
    Timeout {
        capability: &'static str,
        after: Duration,
    },

    #[error("invalid calibration input: {0}")]
    CalibrationInput(String),

    #[error("cannot extract text from {path}: {message}")]
    Extraction { path: PathBuf, message: String },

    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl Error {
    pub(crate) fn capability(
        capability: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Capability {
            capability,
            message: message.to_string(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
