use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("invalid settings file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    /// A single collection failed or timed out. Non-fatal to a job.
    #[error("collection {collection} unavailable: {reason}")]
    CollectionUnavailable { collection: String, reason: String },

    /// Every queried collection failed.
    #[error("retrieval unavailable: no collection responded")]
    RetrievalUnavailable,

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("generation provider unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("job {0} has not finished")]
    JobNotFinished(String),

    #[error("invalid job transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}
