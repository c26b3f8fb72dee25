//! Staging and swapping the agent working store.
//!
//! The live store is only ever replaced by a rename of a fully merged file
//! that already carries its new revision marker.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info};

use gpfleet_core::ids::{Revision, SyncSessionId};
use payload::schema;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub path: PathBuf,
    pub revision: Revision,
    pub policies: u64,
    pub elements: u64,
    pub items: u64,
}

/// Temp working file next to the live store, so the final rename stays on
/// one filesystem.
pub fn staging_path(live: &Path, session: SyncSessionId) -> PathBuf {
    let name = live
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "working.db".to_string());
    live.with_file_name(format!(".{name}.staging-{session}"))
}

/// Builds the merged store at `staging` from the live store (or the payload
/// when there is no live store yet) with every data table replaced by the
/// payload's rows.
pub fn stage(live: &Path, verified_payload: &Path, staging: &Path, revision: Revision) -> Result<StageSummary, SyncError> {
    if let Some(parent) = staging.parent() {
        fs::create_dir_all(parent)?;
    }
    if staging.exists() {
        fs::remove_file(staging)?;
    }

    let result = stage_into(live, verified_payload, staging, revision);
    if result.is_err() {
        let _ = fs::remove_file(staging);
    }
    result
}

fn stage_into(live: &Path, verified_payload: &Path, staging: &Path, revision: Revision) -> Result<StageSummary, SyncError> {
    let base = if live.exists() { live } else { verified_payload };
    fs::copy(base, staging)?;
    debug!(base = %base.display(), staging = %staging.display(), "staging copy created");

    let mut conn = Connection::open(staging)?;
    schema::create_payload_schema(&conn)?;
    conn.execute("ATTACH DATABASE ?1 AS payload", [schema::read_only_uri(verified_payload)])?;

    let missing = schema::missing_tables(&conn, "payload")?;
    if !missing.is_empty() {
        return Err(SyncError::Transfer(format!(
            "verified payload lacks tables: {}",
            missing.join(", ")
        )));
    }

    let synced_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());

    let tx = conn.transaction()?;
    tx.execute_batch(
        "DELETE FROM main.PolicyElementItems;
         DELETE FROM main.PolicyElements;
         DELETE FROM main.Policies;",
    )?;
    let policies = tx.execute(
        "INSERT INTO main.Policies (Id, Hash, Name, DisplayName, Category, Scope, RegistryKey, ValueName,
                                    EnabledValue, DisabledValue, ListKeys, SupportedOn, Revision)
         SELECT Id, Hash, Name, DisplayName, Category, Scope, RegistryKey, ValueName,
                EnabledValue, DisabledValue, ListKeys, SupportedOn, Revision
         FROM payload.Policies",
        [],
    )?;
    let elements = tx.execute(
        "INSERT INTO main.PolicyElements (Id, PolicyId, IdName, Kind, RegistryKey, ValueName, Constraints, Ordinal)
         SELECT Id, PolicyId, IdName, Kind, RegistryKey, ValueName, Constraints, Ordinal
         FROM payload.PolicyElements",
        [],
    )?;
    let items = tx.execute(
        "INSERT INTO main.PolicyElementItems
            (Id, PolicyElementId, ParentId, ParentType, Name, RegistryKey, ValueName, Value, Ordinal)
         SELECT Id, PolicyElementId, ParentId, ParentType, Name, RegistryKey, ValueName, Value, Ordinal
         FROM payload.PolicyElementItems",
        [],
    )?;
    schema::write_meta(&tx, "main", schema::META_REVISION, &revision.0.to_string())?;
    schema::write_meta(&tx, "main", schema::META_SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
    schema::write_meta(&tx, "main", schema::META_SYNCED_AT, &synced_at)?;
    tx.commit()?;
    conn.execute_batch("DETACH DATABASE payload;")?;
    drop(conn);

    Ok(StageSummary {
        path: staging.to_path_buf(),
        revision,
        policies: policies as u64,
        elements: elements as u64,
        items: items as u64,
    })
}

/// Copies the live store into `backup_dir` under a name that has never been
/// used before. Returns `None` when there is no live store.
pub fn backup_working_store(live: &Path, backup_dir: &Path, revision: Revision) -> Result<Option<PathBuf>, SyncError> {
    if !live.exists() {
        return Ok(None);
    }
    fs::create_dir_all(backup_dir)?;

    let stamp = OffsetDateTime::now_utc().unix_timestamp();
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("working-{revision}-{stamp}.db")
        } else {
            format!("working-{revision}-{stamp}-{attempt}.db")
        };
        let path = backup_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut target) => {
                let mut source = File::open(live)?;
                io::copy(&mut source, &mut target)?;
                target.sync_all()?;
                return Ok(Some(path));
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

/// Backs up the previous store, then renames the staged file over the live
/// path.
pub fn commit(
    live: &Path,
    staging: &Path,
    backup_dir: &Path,
    previous: Option<Revision>,
) -> Result<Option<PathBuf>, SyncError> {
    let backup = backup_working_store(live, backup_dir, previous.unwrap_or(Revision::INITIAL))?;
    if let Some(parent) = live.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(staging, live)?;
    info!(live = %live.display(), backup = ?backup, "working store replaced");
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::CatalogReader;
    use tempfile::TempDir;

    fn store(path: &Path, revision: u64, policies: &[(i64, &str)]) {
        let conn = Connection::open(path).unwrap();
        schema::create_payload_schema(&conn).unwrap();
        for (id, name) in policies {
            conn.execute(
                "INSERT INTO Policies (Id, Hash, Name, Scope, RegistryKey, ValueName)
                 VALUES (?1, ?2, ?2, 1, 'Software\\Policies\\Test', ?2)",
                rusqlite::params![id, name],
            )
            .unwrap();
        }
        schema::write_meta(&conn, "main", schema::META_REVISION, &revision.to_string()).unwrap();
    }

    fn names(path: &Path) -> Vec<(i64, String)> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn.prepare("SELECT Id, Name FROM Policies ORDER BY Id").unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        rows
    }

    #[test]
    fn test_stage_replaces_tables_and_keeps_live_untouched() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("working.db");
        let incoming = dir.path().join("payload.db");
        store(&live, 1, &[(1, "Old"), (2, "Gone")]);
        store(&incoming, 4, &[(7, "Fresh"), (9, "Other")]);
        let before = fs::read(&live).unwrap();

        let staging = staging_path(&live, SyncSessionId::new());
        let summary = stage(&live, &incoming, &staging, Revision(4)).unwrap();
        assert_eq!(summary.policies, 2);
        assert_eq!(names(&staging), vec![(7, "Fresh".to_string()), (9, "Other".to_string())]);
        assert_eq!(CatalogReader::open(&staging).unwrap().revision().unwrap(), Some(Revision(4)));
        assert_eq!(fs::read(&live).unwrap(), before);
    }

    #[test]
    fn test_stage_without_live_store_starts_from_payload() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("agent").join("working.db");
        let incoming = dir.path().join("payload.db");
        store(&incoming, 2, &[(3, "Only")]);

        let staging = staging_path(&live, SyncSessionId::new());
        stage(&live, &incoming, &staging, Revision(2)).unwrap();
        assert!(!live.exists());
        assert_eq!(names(&staging), vec![(3, "Only".to_string())]);
    }

    #[test]
    fn test_stage_failure_removes_staging_file() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("working.db");
        let incoming = dir.path().join("payload.db");
        store(&live, 1, &[(1, "Old")]);
        let conn = Connection::open(&incoming).unwrap();
        conn.execute_batch("CREATE TABLE Unrelated (Id INTEGER);").unwrap();
        drop(conn);

        let staging = staging_path(&live, SyncSessionId::new());
        assert!(matches!(
            stage(&live, &incoming, &staging, Revision(2)),
            Err(SyncError::Transfer(_))
        ));
        assert!(!staging.exists());
    }

    #[test]
    fn test_backups_never_overwrite() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("working.db");
        store(&live, 3, &[(1, "Old")]);
        let backups = dir.path().join("backups");

        let first = backup_working_store(&live, &backups, Revision(3)).unwrap().unwrap();
        let second = backup_working_store(&live, &backups, Revision(3)).unwrap().unwrap();
        assert_ne!(first, second);
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("working-r3-"));
        assert_eq!(fs::read(&first).unwrap(), fs::read(&live).unwrap());
        assert_eq!(fs::read(&second).unwrap(), fs::read(&live).unwrap());

        assert_eq!(backup_working_store(&dir.path().join("absent.db"), &backups, Revision(3)).unwrap(), None);
    }

    #[test]
    fn test_commit_swaps_in_staged_store() {
        let dir = TempDir::new().unwrap();
        let live = dir.path().join("working.db");
        let incoming = dir.path().join("payload.db");
        store(&live, 1, &[(1, "Old")]);
        store(&incoming, 2, &[(5, "New")]);
        let previous = fs::read(&live).unwrap();

        let staging = staging_path(&live, SyncSessionId::new());
        stage(&live, &incoming, &staging, Revision(2)).unwrap();
        let backup = commit(&live, &staging, &dir.path().join("backups"), Some(Revision(1)))
            .unwrap()
            .unwrap();

        assert!(!staging.exists());
        assert_eq!(fs::read(&backup).unwrap(), previous);
        assert_eq!(names(&live), vec![(5, "New".to_string())]);
        assert_eq!(CatalogReader::open(&live).unwrap().revision().unwrap(), Some(Revision(2)));
    }
}
