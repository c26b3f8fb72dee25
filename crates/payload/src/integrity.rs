//! Digest and structural checks for payload files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use gpfleet_core::ids::Revision;

use crate::error::IntegrityError;
use crate::schema;

const HASH_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedPayload {
    pub sha256: String,
    pub size: u64,
    pub revision: Revision,
}

/// Lowercase hex SHA-256 of the file, read in fixed-size blocks.
pub fn compute_hash(path: &Path) -> Result<String, IntegrityError> {
    let mut reader = BufReader::with_capacity(HASH_BUFFER, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Checks the digest first, then that the file is a sound store carrying
/// every required table and a revision marker.
pub fn verify(path: &Path, expected_sha256: &str) -> Result<VerifiedPayload, IntegrityError> {
    let actual = compute_hash(path)?;
    if !actual.eq_ignore_ascii_case(expected_sha256.trim()) {
        warn!(path = %path.display(), expected = expected_sha256, actual = %actual, "payload digest mismatch");
        return Err(IntegrityError::DigestMismatch {
            expected: expected_sha256.trim().to_lowercase(),
            actual,
        });
    }

    let revision = check_structure(path)?;
    let size = std::fs::metadata(path)?.len();
    debug!(path = %path.display(), %revision, size, "payload verified");
    Ok(VerifiedPayload {
        sha256: actual,
        size,
        revision,
    })
}

/// Structural check alone; returns the revision recorded in `Meta`.
pub fn check_structure(path: &Path) -> Result<Revision, IntegrityError> {
    let corrupt = |reason: String| IntegrityError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| corrupt(err.to_string()))?;

    let status: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .map_err(|err| corrupt(err.to_string()))?;
    if status != "ok" {
        return Err(corrupt(format!("integrity check: {status}")));
    }

    let missing = schema::missing_tables(&conn, "main").map_err(|err| corrupt(err.to_string()))?;
    if !missing.is_empty() {
        return Err(corrupt(format!("missing tables: {}", missing.join(", "))));
    }

    schema::meta_revision(&conn, "main")
        .map_err(|err| corrupt(err.to_string()))?
        .ok_or_else(|| corrupt("no revision marker".to_string()))
}
