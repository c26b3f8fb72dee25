use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("payload {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("output {} already exists", .0.display())]
    OutputExists(PathBuf),
    #[error("master catalog {} not found", .0.display())]
    MasterMissing(PathBuf),
    #[error("catalog {} has no revision yet; import policies first", .0.display())]
    NoRevision(PathBuf),
    #[error("stored policy data is invalid: {0}")]
    InvalidRow(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
