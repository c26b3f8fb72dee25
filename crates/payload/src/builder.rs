//! Builds a self-contained payload store from the master catalog.
//!
//! Rows are copied by value; the payload's own ids are the only ids that
//! matter downstream. Elements are joined to their policy through the
//! content hash. Items are copied one by one so each payload row can be
//! traced back to its master row; a second pass re-points every parent link
//! through that mapping once all copies exist.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

use gpfleet_core::ids::Revision;
use gpfleet_core::model::ItemParentType;

use crate::error::PayloadError;
use crate::reader::latest_catalog_revision;
use crate::schema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub path: PathBuf,
    pub revision: Revision,
    pub policies: u64,
    pub elements: u64,
    pub items: u64,
}

pub struct PayloadBuilder {
    master: PathBuf,
}

impl PayloadBuilder {
    pub fn new(master: &Path) -> Self {
        Self {
            master: master.to_path_buf(),
        }
    }

    /// Builds into `output`, which must not exist yet.
    pub fn build(&self, output: &Path) -> Result<BuildSummary, PayloadError> {
        if !self.master.exists() {
            return Err(PayloadError::MasterMissing(self.master.clone()));
        }
        if output.exists() {
            return Err(PayloadError::OutputExists(output.to_path_buf()));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let result = self.build_into(output);
        if result.is_err() {
            let _ = fs::remove_file(output);
        }
        result
    }

    fn build_into(&self, output: &Path) -> Result<BuildSummary, PayloadError> {
        let mut conn = Connection::open(output)?;
        schema::create_payload_schema(&conn)?;
        conn.execute("ATTACH DATABASE ?1 AS master", [schema::read_only_uri(&self.master)])?;

        let revision = latest_catalog_revision(&conn, "master")?
            .ok_or_else(|| PayloadError::NoRevision(self.master.clone()))?;

        let tx = conn.transaction()?;
        let policies = copy_policies(&tx)?;
        let elements = copy_elements(&tx)?;
        let copied = copy_items(&tx)?;
        let orphans = relink_item_parents(&tx, &copied)?;
        let items = (copied.len() - orphans) as u64;

        let built_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());
        schema::write_meta(&tx, "main", schema::META_REVISION, &revision.0.to_string())?;
        schema::write_meta(&tx, "main", schema::META_SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        schema::write_meta(&tx, "main", schema::META_BUILT_AT, &built_at)?;
        tx.commit()?;

        conn.execute_batch("DETACH DATABASE master;")?;
        conn.execute_batch("VACUUM;")?;

        info!(
            path = %output.display(),
            %revision,
            policies,
            elements,
            items,
            "payload built"
        );
        Ok(BuildSummary {
            path: output.to_path_buf(),
            revision,
            policies,
            elements,
            items,
        })
    }
}

fn copy_policies(tx: &Transaction<'_>) -> rusqlite::Result<u64> {
    let copied = tx.execute(
        "INSERT INTO main.Policies (Hash, Name, DisplayName, Category, Scope, RegistryKey, ValueName,
                                    EnabledValue, DisabledValue, ListKeys, SupportedOn, Revision)
         SELECT Hash, Name, DisplayName, Category, Scope, RegistryKey, ValueName,
                EnabledValue, DisabledValue, ListKeys, SupportedOn, Revision
         FROM master.Policies ORDER BY Id",
        [],
    )?;
    Ok(copied as u64)
}

fn copy_elements(tx: &Transaction<'_>) -> rusqlite::Result<u64> {
    let copied = tx.execute(
        "INSERT INTO main.PolicyElements (PolicyId, IdName, Kind, RegistryKey, ValueName, Constraints, Ordinal)
         SELECT p.Id, e.IdName, e.Kind, e.RegistryKey, e.ValueName, e.Constraints, e.Ordinal
         FROM master.PolicyElements e
         JOIN master.Policies mp ON mp.Id = e.PolicyId
         JOIN main.Policies p ON p.Hash = mp.Hash
         ORDER BY e.Id",
        [],
    )?;
    Ok(copied as u64)
}

/// A master item row as copied into the payload.
struct CopiedItem {
    master_parent: i64,
    parent_type: ItemParentType,
    payload_id: i64,
    payload_element: i64,
}

/// First pass: items land under their payload element with `ParentId = 0`.
/// Returns the copies keyed by master item id.
fn copy_items(tx: &Transaction<'_>) -> Result<HashMap<i64, CopiedItem>, PayloadError> {
    let mut select = tx.prepare(
        "SELECT i.Id, i.ParentId, i.ParentType, e.Id, i.Name, i.RegistryKey, i.ValueName, i.Value, i.Ordinal
         FROM master.PolicyElementItems i
         JOIN master.PolicyElements me ON me.Id = i.PolicyElementId
         JOIN master.Policies mp ON mp.Id = me.PolicyId
         JOIN main.Policies p ON p.Hash = mp.Hash
         JOIN main.PolicyElements e ON e.PolicyId = p.Id AND e.IdName = me.IdName
         ORDER BY i.Id",
    )?;
    let mut insert = tx.prepare(
        "INSERT INTO main.PolicyElementItems
            (PolicyElementId, ParentId, ParentType, Name, RegistryKey, ValueName, Value, Ordinal)
         VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    let mut rows = select.query([])?;
    let mut copied = HashMap::new();
    while let Some(row) = rows.next()? {
        let master_id: i64 = row.get(0)?;
        let parent_code: i64 = row.get(2)?;
        let name: String = row.get(4)?;
        let parent_type = ItemParentType::from_code(parent_code)
            .ok_or_else(|| PayloadError::InvalidRow(format!("item {name}: unknown parent type {parent_code}")))?;
        let payload_element: i64 = row.get(3)?;
        insert.execute(params![
            payload_element,
            parent_code,
            name,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, i64>(8)?,
        ])?;
        copied.insert(
            master_id,
            CopiedItem {
                master_parent: row.get(1)?,
                parent_type,
                payload_id: tx.last_insert_rowid(),
                payload_element,
            },
        );
    }
    Ok(copied)
}

/// Second pass: translates every master parent pointer into the id of the
/// parent's payload copy. Items whose parent was not copied are removed.
fn relink_item_parents(tx: &Transaction<'_>, copied: &HashMap<i64, CopiedItem>) -> Result<usize, PayloadError> {
    let mut update = tx.prepare("UPDATE main.PolicyElementItems SET ParentId = ?1 WHERE Id = ?2")?;
    let mut orphans = Vec::new();
    for (master_id, item) in copied {
        let parent_id = match item.parent_type {
            ItemParentType::Element => item.payload_element,
            ItemParentType::Item => match copied.get(&item.master_parent) {
                Some(parent) if parent.payload_element == item.payload_element => parent.payload_id,
                _ => {
                    warn!(master_id = *master_id, parent = item.master_parent, "item parent could not be resolved");
                    orphans.push(item.payload_id);
                    continue;
                }
            },
        };
        update.execute(params![parent_id, item.payload_id])?;
    }
    for id in &orphans {
        tx.execute("DELETE FROM main.PolicyElementItems WHERE Id = ?1", [id])?;
    }
    Ok(orphans.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{item, policy};
    use crate::catalog::CatalogStore;
    use crate::reader::CatalogReader;
    use gpfleet_core::model::PolicyDefinition;
    use tempfile::TempDir;

    fn master_with(dir: &TempDir, policies: &[PolicyDefinition]) -> PathBuf {
        let path = dir.path().join("catalog.db");
        let mut store = CatalogStore::open(&path).unwrap();
        store.import(policies, None).unwrap();
        path
    }

    /// Tree shape of a policy as nested names, independent of row ids.
    fn shape(policy: &PolicyDefinition) -> Vec<String> {
        fn walk(items: &[gpfleet_core::model::PolicyElementItem], prefix: &str, out: &mut Vec<String>) {
            for item in items {
                let path = format!("{prefix}/{}", item.name);
                out.push(path.clone());
                walk(&item.children, &path, out);
            }
        }
        let mut out = Vec::new();
        for element in &policy.elements {
            out.push(element.id_name.clone());
            walk(&element.items, &element.id_name, &mut out);
        }
        out
    }

    #[test]
    fn test_payload_preserves_tree_shape() {
        let dir = TempDir::new().unwrap();
        let policies = vec![policy("Alpha", true), policy("Beta", false), policy("Gamma", true)];
        let master = master_with(&dir, &policies);

        // Churn the master so its ids no longer line up with a fresh copy.
        let mut store = CatalogStore::open(&master).unwrap();
        let mut alpha = policy("Alpha", true);
        alpha.enabled_value = Some(9);
        store.import(&[alpha.clone()], None).unwrap();
        drop(store);

        let output = dir.path().join("payloads").join("payload-r2.db");
        let summary = PayloadBuilder::new(&master).build(&output).unwrap();
        assert_eq!(summary.revision, Revision(2));
        assert_eq!(summary.policies, 3);
        assert_eq!(summary.elements, 4);
        assert_eq!(summary.items, 8);

        let master_policies = CatalogReader::open(&master).unwrap().policies().unwrap();
        let reader = CatalogReader::open(&output).unwrap();
        assert_eq!(reader.revision().unwrap(), Some(Revision(2)));
        let payload_policies = reader.policies().unwrap();
        assert_eq!(payload_policies.len(), master_policies.len());
        for master_policy in &master_policies {
            let copy = payload_policies
                .iter()
                .find(|candidate| candidate.hash() == master_policy.hash())
                .unwrap();
            assert_eq!(shape(copy), shape(master_policy));
            assert_eq!(copy, master_policy);
        }
    }

    #[test]
    fn test_payload_keeps_repeated_child_names_under_their_own_parents() {
        let dir = TempDir::new().unwrap();
        let mut schedule = policy("Schedule", true);
        schedule.elements[0].items = vec![
            item("Auto", 4, vec![item("On", 1, vec![item("Value", 7, Vec::new())])]),
            item("Notify", 2, vec![item("On", 3, vec![item("Value", 8, Vec::new())])]),
        ];
        let master = master_with(&dir, &[schedule]);

        let output = dir.path().join("payload.db");
        let summary = PayloadBuilder::new(&master).build(&output).unwrap();
        assert_eq!(summary.items, 6);

        let copy = CatalogReader::open(&output).unwrap().policies().unwrap().remove(0);
        assert_eq!(
            shape(&copy),
            vec![
                "Mode",
                "Mode/Auto",
                "Mode/Auto/On",
                "Mode/Auto/On/Value",
                "Mode/Notify",
                "Mode/Notify/On",
                "Mode/Notify/On/Value",
                "Retries",
            ]
        );
        let original = CatalogReader::open(&master).unwrap().policies().unwrap().remove(0);
        assert_eq!(copy, original);
    }

    #[test]
    fn test_build_refuses_existing_output_and_empty_master() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.db");
        CatalogStore::open(&empty).unwrap();
        let output = dir.path().join("payload.db");
        assert!(matches!(
            PayloadBuilder::new(&empty).build(&output),
            Err(PayloadError::NoRevision(_))
        ));
        assert!(!output.exists());

        let master = master_with(&dir, &[policy("Alpha", false)]);
        fs::write(&output, b"occupied").unwrap();
        assert!(matches!(
            PayloadBuilder::new(&master).build(&output),
            Err(PayloadError::OutputExists(_))
        ));
    }
}
