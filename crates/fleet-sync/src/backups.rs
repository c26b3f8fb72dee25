//! Retained sync artifacts under the agent backup directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::error::SyncError;

pub const CHUNKS_FILE: &str = "chunks.bin";
pub const PAYLOAD_FILE: &str = "payload.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    WorkingStore,
    ReceivedChunks,
    VerifiedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub kind: BackupKind,
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: Option<OffsetDateTime>,
}

/// Working-store backups and per-session transfer files, sorted by path.
/// A missing directory has no backups.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<BackupEntry>, SyncError> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(backup_dir).max_depth(2).sort_by_file_name() {
        let entry = entry.map_err(|err| SyncError::Io(err.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = classify(entry.path(), entry.depth()) else {
            continue;
        };
        let metadata = entry.metadata().map_err(|err| SyncError::Io(err.into()))?;
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|time| OffsetDateTime::try_from(time).ok());
        entries.push(BackupEntry {
            kind,
            path: entry.path().to_path_buf(),
            size: metadata.len(),
            modified_at,
        });
    }
    entries.sort_by(|left, right| left.path.cmp(&right.path));
    Ok(entries)
}

fn classify(path: &Path, depth: usize) -> Option<BackupKind> {
    let name = path.file_name()?.to_str()?;
    match depth {
        1 if name.starts_with("working-") && name.ends_with(".db") => Some(BackupKind::WorkingStore),
        2 => {
            let session = path.parent()?.file_name()?.to_str()?;
            if !session.starts_with("sync-") {
                return None;
            }
            match name {
                CHUNKS_FILE => Some(BackupKind::ReceivedChunks),
                PAYLOAD_FILE => Some(BackupKind::VerifiedPayload),
                _ => None,
            }
        }
        _ => None,
    }
}
