//! Loads policy trees back out of a catalog, payload or working store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::warn;

use gpfleet_core::ids::{PolicyHash, Revision};
use gpfleet_core::model::{
    ElementConstraints, ElementKind, ItemParentType, PolicyDefinition, PolicyElement, PolicyElementItem,
    PolicyScope, RegistryValue,
};

use crate::error::PayloadError;
use crate::schema;

/// A policy together with the content hash it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPolicy {
    pub id: i64,
    pub hash: PolicyHash,
    pub revision: Revision,
    pub definition: PolicyDefinition,
}

struct ItemRow {
    id: i64,
    parent_id: i64,
    parent_type: ItemParentType,
    item: PolicyElementItem,
}

/// Read-only view of any store that carries the policy tables.
pub struct CatalogReader {
    conn: Connection,
    path: PathBuf,
}

impl CatalogReader {
    pub fn open(path: &Path) -> Result<Self, PayloadError> {
        if !path.exists() {
            return Err(PayloadError::MasterMissing(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policies(&self) -> Result<Vec<PolicyDefinition>, PayloadError> {
        Ok(read_stored_policies(&self.conn, "main")?
            .into_iter()
            .map(|stored| stored.definition)
            .collect())
    }

    pub fn stored_policies(&self) -> Result<Vec<StoredPolicy>, PayloadError> {
        read_stored_policies(&self.conn, "main")
    }

    /// Case-insensitive lookup by policy name.
    pub fn policy(&self, name: &str) -> Result<Option<PolicyDefinition>, PayloadError> {
        Ok(self
            .policies()?
            .into_iter()
            .find(|policy| policy.name.eq_ignore_ascii_case(name)))
    }

    /// Revision from `Meta` for payloads and working stores, or the latest
    /// entry of `Revisions` for a master catalog.
    pub fn revision(&self) -> Result<Option<Revision>, PayloadError> {
        if schema::table_exists(&self.conn, "main", "Meta")? {
            return Ok(schema::meta_revision(&self.conn, "main")?);
        }
        if schema::table_exists(&self.conn, "main", "Revisions")? {
            return Ok(latest_catalog_revision(&self.conn, "main")?);
        }
        Ok(None)
    }
}

pub fn latest_catalog_revision(conn: &Connection, schema: &str) -> rusqlite::Result<Option<Revision>> {
    let sql = format!("SELECT MAX(Revision) FROM {schema}.Revisions");
    let value: Option<i64> = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(value.map(|value| Revision(value.max(0) as u64)))
}

pub fn read_policies(conn: &Connection, schema: &str) -> Result<Vec<PolicyDefinition>, PayloadError> {
    Ok(read_stored_policies(conn, schema)?
        .into_iter()
        .map(|stored| stored.definition)
        .collect())
}

pub fn read_stored_policies(conn: &Connection, schema: &str) -> Result<Vec<StoredPolicy>, PayloadError> {
    let mut elements = read_elements(conn, schema)?;

    let sql = format!(
        "SELECT Id, Hash, Name, DisplayName, Category, Scope, RegistryKey, ValueName,
                EnabledValue, DisabledValue, ListKeys, SupportedOn, Revision
         FROM {schema}.Policies ORDER BY Id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, Option<i64>>(8)?,
            row.get::<_, Option<i64>>(9)?,
            row.get::<_, String>(10)?,
            row.get::<_, Option<String>>(11)?,
            row.get::<_, i64>(12)?,
        ))
    })?;

    let mut policies = Vec::new();
    for row in rows {
        let (
            id,
            hash,
            name,
            display_name,
            category,
            scope,
            registry_key,
            value_name,
            enabled_value,
            disabled_value,
            list_keys,
            supported_on,
            revision,
        ) = row?;
        let scope = PolicyScope::from_code(scope)
            .ok_or_else(|| PayloadError::InvalidRow(format!("policy {name}: unknown scope code {scope}")))?;
        let list_keys: Vec<String> = serde_json::from_str(&list_keys)?;
        policies.push(StoredPolicy {
            id,
            hash: PolicyHash(hash),
            revision: Revision(revision.max(0) as u64),
            definition: PolicyDefinition {
                name,
                display_name,
                category,
                scope,
                registry_key,
                value_name,
                enabled_value: enabled_value.and_then(|value| u32::try_from(value).ok()),
                disabled_value: disabled_value.and_then(|value| u32::try_from(value).ok()),
                list_keys,
                supported_on,
                elements: elements.remove(&id).unwrap_or_default(),
            },
        });
    }
    Ok(policies)
}

/// Elements keyed by policy id, each with its item tree rebuilt.
fn read_elements(conn: &Connection, schema: &str) -> Result<HashMap<i64, Vec<PolicyElement>>, PayloadError> {
    let mut items = read_items(conn, schema)?;

    let sql = format!(
        "SELECT Id, PolicyId, IdName, Kind, RegistryKey, ValueName, Constraints
         FROM {schema}.PolicyElements ORDER BY PolicyId, Ordinal, Id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut elements: HashMap<i64, Vec<PolicyElement>> = HashMap::new();
    for row in rows {
        let (id, policy_id, id_name, kind, registry_key, value_name, constraints) = row?;
        let kind: ElementKind = kind
            .parse()
            .map_err(|_| PayloadError::InvalidRow(format!("element {id_name}: unknown kind {kind}")))?;
        let constraints: ElementConstraints = serde_json::from_str(&constraints)?;
        let rows = items.remove(&id).unwrap_or_default();
        elements.entry(policy_id).or_default().push(PolicyElement {
            id_name,
            kind,
            registry_key,
            value_name,
            constraints,
            items: build_item_tree(id, rows),
        });
    }
    Ok(elements)
}

/// Item rows keyed by element id, in ordinal order.
fn read_items(conn: &Connection, schema: &str) -> Result<HashMap<i64, Vec<ItemRow>>, PayloadError> {
    let sql = format!(
        "SELECT Id, PolicyElementId, ParentId, ParentType, Name, RegistryKey, ValueName, Value
         FROM {schema}.PolicyElementItems ORDER BY PolicyElementId, Ordinal, Id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, Option<String>>(7)?,
        ))
    })?;

    let mut items: HashMap<i64, Vec<ItemRow>> = HashMap::new();
    for row in rows {
        let (id, element_id, parent_id, parent_type, name, registry_key, value_name, value) = row?;
        let parent_type = ItemParentType::from_code(parent_type)
            .ok_or_else(|| PayloadError::InvalidRow(format!("item {name}: unknown parent type {parent_type}")))?;
        let value: Option<RegistryValue> = match value {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        items.entry(element_id).or_default().push(ItemRow {
            id,
            parent_id,
            parent_type,
            item: PolicyElementItem {
                name,
                registry_key,
                value_name,
                value,
                children: Vec::new(),
            },
        });
    }
    Ok(items)
}

fn build_item_tree(element_id: i64, rows: Vec<ItemRow>) -> Vec<PolicyElementItem> {
    let total = rows.len();
    let mut by_parent: HashMap<(ItemParentType, i64), Vec<ItemRow>> = HashMap::new();
    for row in rows {
        by_parent.entry((row.parent_type, row.parent_id)).or_default().push(row);
    }

    let mut placed = 0usize;
    let roots = attach_children(&mut by_parent, (ItemParentType::Element, element_id), &mut placed);
    if placed != total {
        warn!(element_id, orphans = total - placed, "items with dangling parent links ignored");
    }
    roots
}

fn attach_children(
    by_parent: &mut HashMap<(ItemParentType, i64), Vec<ItemRow>>,
    parent: (ItemParentType, i64),
    placed: &mut usize,
) -> Vec<PolicyElementItem> {
    let Some(rows) = by_parent.remove(&parent) else {
        return Vec::new();
    };
    rows.into_iter()
        .map(|row| {
            *placed += 1;
            let mut item = row.item;
            item.children = attach_children(by_parent, (ItemParentType::Item, row.id), placed);
            item
        })
        .collect()
}
