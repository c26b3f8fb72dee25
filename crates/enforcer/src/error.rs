use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user-scoped operation on {key} has no target SID")]
    AmbiguousScope { key: String },
    #[error("invalid key path: {0:?}")]
    InvalidKey(String),
    #[error("key {key} does not exist under {root}")]
    MissingParent { root: String, key: String },
    #[error("permission denied writing {}", path.display())]
    PermissionDenied { path: PathBuf },
    #[error("registry hive {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Maps a write failure on `path`, singling out permission problems.
    pub(crate) fn from_write(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            StoreError::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            StoreError::Io(err)
        }
    }
}
