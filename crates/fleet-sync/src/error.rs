use std::time::Duration;

use thiserror::Error;

use gpfleet_core::error::FleetError;
use gpfleet_core::ids::Revision;
use payload::{IntegrityError, PayloadError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("master refused sync: {0}")]
    Rejected(String),
    #[error("stale payload: master offers {offered}, local store is at {local}")]
    Stale { offered: Revision, local: Revision },
    #[error("payload declares {declared} but carries {embedded}")]
    RevisionMismatch { declared: Revision, embedded: Revision },
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("sync cancelled")]
    Cancelled,
    #[error("sync timed out after {0:?}")]
    TimedOut(Duration),
    #[error("background task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Wire(#[from] FleetError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}
