//! In-memory key tree shared by the memory and file backed stores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use gpfleet_core::model::RegistryValue;
use gpfleet_core::paths::{RegistryPath, RegistryRoot};

use crate::error::StoreError;

/// Values of one key, by lowercase value name. The default value is `""`.
type KeyValues = BTreeMap<String, RegistryValue>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hive {
    roots: BTreeMap<RegistryRoot, BTreeMap<String, KeyValues>>,
}

/// Serialized form; roots are not plain strings so they travel as a list.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HiveDocument {
    pub roots: Vec<HiveRootDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HiveRootDocument {
    pub root: RegistryRoot,
    #[serde(default)]
    pub keys: BTreeMap<String, KeyValues>,
}

impl Hive {
    pub fn create_key(&mut self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        let key = checked(key)?;
        let keys = self.roots.entry(root.clone()).or_default();
        let mut created = false;
        let mut prefix = String::new();
        for component in key.split('\\') {
            if !prefix.is_empty() {
                prefix.push('\\');
            }
            prefix.push_str(component);
            if !keys.contains_key(&prefix) {
                keys.insert(prefix.clone(), KeyValues::new());
                created = true;
            }
        }
        Ok(created)
    }

    pub fn key_exists(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        let key = checked(key)?;
        Ok(self.keys(root).is_some_and(|keys| keys.contains_key(&key)))
    }

    pub fn delete_subtree(&mut self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        let key = checked(key)?;
        let Some(keys) = self.roots.get_mut(root) else {
            return Ok(false);
        };
        let nested = format!("{key}\\");
        let before = keys.len();
        keys.retain(|path, _| path != &key && !path.starts_with(&nested));
        Ok(keys.len() != before)
    }

    pub fn get_value(
        &self,
        root: &RegistryRoot,
        key: &RegistryPath,
        name: &str,
    ) -> Result<Option<RegistryValue>, StoreError> {
        let key = checked(key)?;
        Ok(self
            .keys(root)
            .and_then(|keys| keys.get(&key))
            .and_then(|values| values.get(&name.to_lowercase()))
            .cloned())
    }

    pub fn set_value(
        &mut self,
        root: &RegistryRoot,
        key: &RegistryPath,
        name: &str,
        value: &RegistryValue,
    ) -> Result<(), StoreError> {
        let path = checked(key)?;
        let values = self
            .roots
            .get_mut(root)
            .and_then(|keys| keys.get_mut(&path))
            .ok_or_else(|| StoreError::MissingParent {
                root: root.to_string(),
                key: path.clone(),
            })?;
        values.insert(name.to_lowercase(), value.clone());
        Ok(())
    }

    pub fn delete_value(&mut self, root: &RegistryRoot, key: &RegistryPath, name: &str) -> Result<bool, StoreError> {
        let key = checked(key)?;
        Ok(self
            .roots
            .get_mut(root)
            .and_then(|keys| keys.get_mut(&key))
            .is_some_and(|values| values.remove(&name.to_lowercase()).is_some()))
    }

    pub fn user_sids(&self) -> Vec<String> {
        self.roots
            .keys()
            .filter_map(|root| match root {
                RegistryRoot::User(sid) => Some(sid.clone()),
                RegistryRoot::Machine => None,
            })
            .collect()
    }

    /// Makes an empty root known, e.g. a user profile that has logged on.
    pub fn add_root(&mut self, root: RegistryRoot) {
        self.roots.entry(root).or_default();
    }

    fn keys(&self, root: &RegistryRoot) -> Option<&BTreeMap<String, KeyValues>> {
        self.roots.get(root)
    }

    pub fn to_document(&self) -> HiveDocument {
        HiveDocument {
            roots: self
                .roots
                .iter()
                .map(|(root, keys)| HiveRootDocument {
                    root: root.clone(),
                    keys: keys.clone(),
                })
                .collect(),
        }
    }

    pub fn from_document(document: HiveDocument) -> Self {
        let mut hive = Hive::default();
        for entry in document.roots {
            let keys = hive.roots.entry(entry.root).or_default();
            for (path, values) in entry.keys {
                let path = RegistryPath::parse(&path).normalized();
                let values = values
                    .into_iter()
                    .map(|(name, value)| (name.to_lowercase(), value))
                    .collect();
                keys.insert(path, values);
            }
        }
        hive
    }
}

fn checked(key: &RegistryPath) -> Result<String, StoreError> {
    if key.is_root() {
        return Err(StoreError::InvalidKey(key.normalized()));
    }
    Ok(key.normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_key_creates_ancestors() {
        let mut hive = Hive::default();
        let root = RegistryRoot::Machine;
        assert!(hive.create_key(&root, &RegistryPath::parse("Software\\Contoso\\App")).unwrap());
        assert!(!hive.create_key(&root, &RegistryPath::parse("software\\contoso\\app")).unwrap());
        assert!(hive.key_exists(&root, &RegistryPath::parse("SOFTWARE\\Contoso")).unwrap());
    }

    #[test]
    fn test_delete_subtree_spares_siblings() {
        let mut hive = Hive::default();
        let root = RegistryRoot::User("S-1-5-21-1".to_string());
        hive.create_key(&root, &RegistryPath::parse("Software\\App\\Sub")).unwrap();
        hive.create_key(&root, &RegistryPath::parse("Software\\AppData")).unwrap();

        assert!(hive.delete_subtree(&root, &RegistryPath::parse("Software\\App")).unwrap());
        assert!(!hive.key_exists(&root, &RegistryPath::parse("Software\\App\\Sub")).unwrap());
        assert!(hive.key_exists(&root, &RegistryPath::parse("Software\\AppData")).unwrap());
        assert!(!hive.delete_subtree(&root, &RegistryPath::parse("Software\\App")).unwrap());
    }

    #[test]
    fn test_values_need_their_key() {
        let mut hive = Hive::default();
        let root = RegistryRoot::Machine;
        let key = RegistryPath::parse("Software\\App");
        let err = hive.set_value(&root, &key, "Level", &RegistryValue::DWord(1)).unwrap_err();
        assert!(matches!(err, StoreError::MissingParent { .. }));

        hive.create_key(&root, &key).unwrap();
        hive.set_value(&root, &key, "Level", &RegistryValue::DWord(1)).unwrap();
        assert_eq!(hive.get_value(&root, &key, "LEVEL").unwrap(), Some(RegistryValue::DWord(1)));
        assert!(hive.delete_value(&root, &key, "level").unwrap());
        assert_eq!(hive.get_value(&root, &key, "Level").unwrap(), None);
    }

    #[test]
    fn test_root_path_is_rejected() {
        let hive = Hive::default();
        let err = hive.key_exists(&RegistryRoot::Machine, &RegistryPath::parse("\\")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
