//! JSON hive on disk. Every mutation is written through a temp file and
//! renamed into place, so a crash never leaves a half-written hive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use gpfleet_core::model::RegistryValue;
use gpfleet_core::paths::{RegistryPath, RegistryRoot};

use crate::error::StoreError;
use crate::hive::{Hive, HiveDocument};
use crate::store::RegistryStore;

#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    hive: Mutex<Hive>,
}

impl FileRegistry {
    /// Opens the hive at `path`; a missing file is an empty hive.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let hive = if path.exists() {
            let contents = fs::read_to_string(path)?;
            let document: HiveDocument = serde_json::from_str(&contents).map_err(|err| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
            Hive::from_document(document)
        } else {
            Hive::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            hive: Mutex::new(hive),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a user root so `Global` targets reach it before it holds any key.
    pub fn add_user(&self, sid: &str) -> Result<(), StoreError> {
        self.mutate(|hive| {
            hive.add_root(RegistryRoot::User(sid.to_string()));
            Ok(())
        })
    }

    fn lock(&self) -> MutexGuard<'_, Hive> {
        self.hive.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `change` on a copy of the hive and only keeps it once persisted.
    fn mutate<T>(&self, change: impl FnOnce(&mut Hive) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut hive = self.lock();
        let mut updated = hive.clone();
        let result = change(&mut updated)?;
        if updated != *hive {
            self.persist(&updated)?;
            *hive = updated;
        }
        Ok(result)
    }

    fn persist(&self, hive: &Hive) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::from_write(parent, err))?;
        }
        let contents = serde_json::to_string_pretty(&hive.to_document()).map_err(|err| StoreError::Corrupt {
            path: self.path.clone(),
            reason: err.to_string(),
        })?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, contents).map_err(|err| StoreError::from_write(&temp, err))?;
        fs::rename(&temp, &self.path).map_err(|err| StoreError::from_write(&self.path, err))?;
        debug!(path = %self.path.display(), "registry hive written");
        Ok(())
    }
}

impl RegistryStore for FileRegistry {
    fn create_key(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        self.mutate(|hive| hive.create_key(root, key))
    }

    fn key_exists(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        self.lock().key_exists(root, key)
    }

    fn delete_subtree(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        self.mutate(|hive| hive.delete_subtree(root, key))
    }

    fn get_value(
        &self,
        root: &RegistryRoot,
        key: &RegistryPath,
        name: &str,
    ) -> Result<Option<RegistryValue>, StoreError> {
        self.lock().get_value(root, key, name)
    }

    fn set_value(
        &self,
        root: &RegistryRoot,
        key: &RegistryPath,
        name: &str,
        value: &RegistryValue,
    ) -> Result<(), StoreError> {
        self.mutate(|hive| hive.set_value(root, key, name, value))
    }

    fn delete_value(&self, root: &RegistryRoot, key: &RegistryPath, name: &str) -> Result<bool, StoreError> {
        self.mutate(|hive| hive.delete_value(root, key, name))
    }

    fn user_sids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().user_sids())
    }
}
