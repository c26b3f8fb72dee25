//! Master catalog store. Policies are keyed by content hash; every import
//! that changes something records a new revision.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use gpfleet_core::ids::{PolicyHash, Revision};
use gpfleet_core::model::{ItemParentType, PolicyDefinition, PolicyElementItem};

use crate::error::PayloadError;
use crate::reader::{latest_catalog_revision, read_stored_policies, StoredPolicy};
use crate::schema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub revision: Revision,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ImportSummary {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub revision: Revision,
    pub created_at: String,
    pub policy_count: u64,
    pub note: Option<String>,
}

pub struct CatalogStore {
    conn: Connection,
    path: PathBuf,
}

impl CatalogStore {
    pub fn open(path: &Path) -> Result<Self, PayloadError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::create_catalog_schema(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn latest_revision(&self) -> Result<Option<Revision>, PayloadError> {
        Ok(latest_catalog_revision(&self.conn, "main")?)
    }

    pub fn policies(&self) -> Result<Vec<StoredPolicy>, PayloadError> {
        read_stored_policies(&self.conn, "main")
    }

    pub fn revisions(&self) -> Result<Vec<RevisionRecord>, PayloadError> {
        let mut stmt = self
            .conn
            .prepare("SELECT Revision, CreatedAt, PolicyCount, Note FROM Revisions ORDER BY Revision")?;
        let rows = stmt.query_map([], |row| {
            Ok(RevisionRecord {
                revision: Revision(row.get::<_, i64>(0)?.max(0) as u64),
                created_at: row.get(1)?,
                policy_count: row.get::<_, i64>(2)?.max(0) as u64,
                note: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Upserts `definitions` by content hash. Unchanged definitions are left
    /// alone; when anything changes, all changed rows carry the new revision.
    pub fn import(&mut self, definitions: &[PolicyDefinition], note: Option<&str>) -> Result<ImportSummary, PayloadError> {
        let tx = self.conn.transaction()?;
        let existing: HashMap<PolicyHash, StoredPolicy> = read_stored_policies(&tx, "main")?
            .into_iter()
            .map(|stored| (stored.hash.clone(), stored))
            .collect();
        let current = latest_catalog_revision(&tx, "main")?.unwrap_or(Revision::INITIAL);

        let mut incoming: Vec<(PolicyHash, &PolicyDefinition)> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let hash = definition.hash();
            if let Some(position) = incoming.iter().position(|(known, _)| *known == hash) {
                warn!(policy = %definition.name, "duplicate policy in import; last definition wins");
                incoming.remove(position);
            }
            incoming.push((hash, definition));
        }

        let mut summary = ImportSummary {
            revision: current,
            inserted: 0,
            updated: 0,
            unchanged: 0,
        };
        let mut pending = Vec::new();
        for (hash, definition) in incoming {
            match existing.get(&hash) {
                Some(stored) if stored.definition == *definition => summary.unchanged += 1,
                Some(stored) => {
                    summary.updated += 1;
                    pending.push((hash, definition, Some(stored.id)));
                }
                None => {
                    summary.inserted += 1;
                    pending.push((hash, definition, None));
                }
            }
        }

        if pending.is_empty() {
            tx.commit()?;
            info!(revision = %current, unchanged = summary.unchanged, "catalog import changed nothing");
            return Ok(summary);
        }

        let revision = current.next();
        for (hash, definition, previous) in pending {
            if let Some(policy_id) = previous {
                delete_policy(&tx, policy_id)?;
            }
            insert_policy(&tx, &hash, definition, revision)?;
        }

        let count: i64 = tx.query_row("SELECT COUNT(*) FROM Policies", [], |row| row.get(0))?;
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());
        tx.execute(
            "INSERT INTO Revisions (Revision, CreatedAt, PolicyCount, Note) VALUES (?1, ?2, ?3, ?4)",
            params![revision.0 as i64, created_at, count, note],
        )?;
        tx.commit()?;

        summary.revision = revision;
        info!(
            %revision,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "catalog import committed"
        );
        Ok(summary)
    }
}

fn delete_policy(tx: &Transaction<'_>, policy_id: i64) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM PolicyElementItems WHERE PolicyElementId IN
            (SELECT Id FROM PolicyElements WHERE PolicyId = ?1)",
        [policy_id],
    )?;
    tx.execute("DELETE FROM PolicyElements WHERE PolicyId = ?1", [policy_id])?;
    tx.execute("DELETE FROM Policies WHERE Id = ?1", [policy_id])?;
    Ok(())
}

fn insert_policy(
    tx: &Transaction<'_>,
    hash: &PolicyHash,
    policy: &PolicyDefinition,
    revision: Revision,
) -> Result<(), PayloadError> {
    tx.execute(
        "INSERT INTO Policies (Hash, Name, DisplayName, Category, Scope, RegistryKey, ValueName,
                               EnabledValue, DisabledValue, ListKeys, SupportedOn, Revision)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            hash.as_str(),
            policy.name,
            policy.display_name,
            policy.category,
            policy.scope.as_code(),
            policy.registry_key,
            policy.value_name,
            policy.enabled_value,
            policy.disabled_value,
            serde_json::to_string(&policy.list_keys)?,
            policy.supported_on,
            revision.0 as i64,
        ],
    )?;
    let policy_id = tx.last_insert_rowid();

    for (ordinal, element) in policy.elements.iter().enumerate() {
        tx.execute(
            "INSERT INTO PolicyElements (PolicyId, IdName, Kind, RegistryKey, ValueName, Constraints, Ordinal)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                policy_id,
                element.id_name,
                element.kind.as_str(),
                element.registry_key,
                element.value_name,
                serde_json::to_string(&element.constraints)?,
                ordinal as i64,
            ],
        )?;
        let element_id = tx.last_insert_rowid();
        insert_items(tx, element_id, element_id, ItemParentType::Element, &element.items)?;
    }
    Ok(())
}

fn insert_items(
    tx: &Transaction<'_>,
    element_id: i64,
    parent_id: i64,
    parent_type: ItemParentType,
    items: &[PolicyElementItem],
) -> Result<(), PayloadError> {
    for (ordinal, item) in items.iter().enumerate() {
        let value = match &item.value {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };
        tx.execute(
            "INSERT INTO PolicyElementItems
                (PolicyElementId, ParentId, ParentType, Name, RegistryKey, ValueName, Value, Ordinal)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                element_id,
                parent_id,
                parent_type.as_code(),
                item.name,
                item.registry_key,
                item.value_name,
                value,
                ordinal as i64,
            ],
        )?;
        let item_id = tx.last_insert_rowid();
        insert_items(tx, element_id, item_id, ItemParentType::Item, &item.children)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use gpfleet_core::model::{
        ElementConstraints, ElementKind, PolicyElement, PolicyElementItem, PolicyScope, RegistryValue,
    };

    use super::*;

    pub fn item(name: &str, value: u32, children: Vec<PolicyElementItem>) -> PolicyElementItem {
        PolicyElementItem {
            name: name.to_string(),
            registry_key: None,
            value_name: None,
            value: Some(RegistryValue::DWord(value)),
            children,
        }
    }

    pub fn policy(name: &str, with_tree: bool) -> PolicyDefinition {
        let elements = if with_tree {
            vec![
                PolicyElement {
                    id_name: "Mode".to_string(),
                    kind: ElementKind::Enum,
                    registry_key: None,
                    value_name: Some("Mode".to_string()),
                    constraints: ElementConstraints::default(),
                    items: vec![
                        item("Auto", 4, vec![item("Hour", 3, vec![item("Minute", 30, Vec::new())])]),
                        item("Notify", 2, Vec::new()),
                    ],
                },
                PolicyElement {
                    id_name: "Retries".to_string(),
                    kind: ElementKind::Decimal,
                    registry_key: Some("Software\\Policies\\Contoso\\Retry".to_string()),
                    value_name: Some("Count".to_string()),
                    constraints: ElementConstraints {
                        max_value: Some(10),
                        ..ElementConstraints::default()
                    },
                    items: Vec::new(),
                },
            ]
        } else {
            Vec::new()
        };
        PolicyDefinition {
            name: name.to_string(),
            display_name: Some(format!("{name} policy")),
            category: Some("Contoso".to_string()),
            scope: PolicyScope::Machine,
            registry_key: format!("Software\\Policies\\Contoso\\{name}"),
            value_name: "Enabled".to_string(),
            enabled_value: Some(1),
            disabled_value: None,
            list_keys: Vec::new(),
            supported_on: Some("SUPPORTED_Windows7".to_string()),
            elements,
        }
    }
}
