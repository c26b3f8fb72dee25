//! Table layout shared by the master catalog, payloads and agent working stores.
//!
//! The three data tables and the `Meta` revision marker are the portable
//! contract between the payload builder and the agent merge.

use rusqlite::{Connection, OptionalExtension};

use gpfleet_core::ids::Revision;

pub const SCHEMA_VERSION: u32 = 1;

pub const DATA_TABLES: [&str; 3] = ["Policies", "PolicyElements", "PolicyElementItems"];

/// Tables every payload and working store must carry.
pub const REQUIRED_TABLES: [&str; 4] = ["Policies", "PolicyElements", "PolicyElementItems", "Meta"];

pub const META_REVISION: &str = "Revision";
pub const META_SCHEMA_VERSION: &str = "SchemaVersion";
pub const META_BUILT_AT: &str = "BuiltAt";
pub const META_SYNCED_AT: &str = "SyncedAt";

const DATA_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Policies (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    Hash TEXT NOT NULL UNIQUE,
    Name TEXT NOT NULL,
    DisplayName TEXT,
    Category TEXT,
    Scope INTEGER NOT NULL,
    RegistryKey TEXT NOT NULL,
    ValueName TEXT NOT NULL,
    EnabledValue INTEGER,
    DisabledValue INTEGER,
    ListKeys TEXT NOT NULL DEFAULT '[]',
    SupportedOn TEXT,
    Revision INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS PolicyElements (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    PolicyId INTEGER NOT NULL REFERENCES Policies(Id) ON DELETE CASCADE,
    IdName TEXT NOT NULL,
    Kind TEXT NOT NULL,
    RegistryKey TEXT,
    ValueName TEXT,
    Constraints TEXT NOT NULL DEFAULT '{}',
    Ordinal INTEGER NOT NULL DEFAULT 0,
    UNIQUE (PolicyId, IdName)
);

CREATE TABLE IF NOT EXISTS PolicyElementItems (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    PolicyElementId INTEGER NOT NULL REFERENCES PolicyElements(Id) ON DELETE CASCADE,
    ParentId INTEGER NOT NULL,
    ParentType INTEGER NOT NULL,
    Name TEXT NOT NULL,
    RegistryKey TEXT,
    ValueName TEXT,
    Value TEXT,
    Ordinal INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS IX_PolicyElements_PolicyId ON PolicyElements (PolicyId);
CREATE INDEX IF NOT EXISTS IX_PolicyElementItems_ElementId ON PolicyElementItems (PolicyElementId);
";

const META_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Meta (
    Key TEXT PRIMARY KEY,
    Value TEXT NOT NULL
);
";

const REVISIONS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Revisions (
    Revision INTEGER PRIMARY KEY,
    CreatedAt TEXT NOT NULL,
    PolicyCount INTEGER NOT NULL,
    Note TEXT
);
";

/// Schema of the master catalog: data tables plus revision history.
pub fn create_catalog_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(DATA_SCHEMA)?;
    conn.execute_batch(REVISIONS_SCHEMA)
}

/// Schema of payloads and agent working stores: data tables plus `Meta`.
pub fn create_payload_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DATA_SCHEMA)?;
    conn.execute_batch(META_SCHEMA)
}

pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM {schema}.sqlite_master WHERE type = 'table' AND name = ?1");
    let count: i64 = conn.query_row(&sql, [table], |row| row.get(0))?;
    Ok(count > 0)
}

pub fn missing_tables(conn: &Connection, schema: &str) -> rusqlite::Result<Vec<&'static str>> {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        if !table_exists(conn, schema, table)? {
            missing.push(table);
        }
    }
    Ok(missing)
}

pub fn write_meta(conn: &Connection, schema: &str, key: &str, value: &str) -> rusqlite::Result<()> {
    let sql = format!("INSERT OR REPLACE INTO {schema}.Meta (Key, Value) VALUES (?1, ?2)");
    conn.execute(&sql, [key, value])?;
    Ok(())
}

pub fn read_meta(conn: &Connection, schema: &str, key: &str) -> rusqlite::Result<Option<String>> {
    let sql = format!("SELECT Value FROM {schema}.Meta WHERE Key = ?1");
    conn.query_row(&sql, [key], |row| row.get(0)).optional()
}

/// Revision recorded in `Meta`. `None` when absent or unparseable.
pub fn meta_revision(conn: &Connection, schema: &str) -> rusqlite::Result<Option<Revision>> {
    Ok(read_meta(conn, schema, META_REVISION)?
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Revision))
}

/// Quotes `path` as a read-only SQLite URI for `ATTACH`.
pub fn read_only_uri(path: &std::path::Path) -> String {
    let display = path.display().to_string();
    let escaped = display.replace('%', "%25").replace('?', "%3f").replace('#', "%23");
    format!("file:{escaped}?mode=ro")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_schema_has_required_tables() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(missing_tables(&conn, "main").unwrap(), REQUIRED_TABLES.to_vec());
        create_payload_schema(&conn).unwrap();
        assert!(missing_tables(&conn, "main").unwrap().is_empty());

        assert_eq!(meta_revision(&conn, "main").unwrap(), None);
        write_meta(&conn, "main", META_REVISION, "12").unwrap();
        assert_eq!(meta_revision(&conn, "main").unwrap(), Some(Revision(12)));
    }

    #[test]
    fn test_read_only_uri_escapes() {
        let uri = read_only_uri(std::path::Path::new("/data/odd?name#1.db"));
        assert_eq!(uri, "file:/data/odd%3fname%231.db?mode=ro");
    }
}
