use std::sync::{Mutex, MutexGuard};

use gpfleet_core::model::RegistryValue;
use gpfleet_core::paths::{RegistryPath, RegistryRoot};

use crate::error::StoreError;
use crate::hive::Hive;

/// Local key/value store with scoped roots. Implementations synchronise
/// internally so one store can be shared between threads.
pub trait RegistryStore: Send + Sync {
    /// Creates `key` and any missing ancestors. Returns whether anything was created.
    fn create_key(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError>;
    fn key_exists(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError>;
    /// Removes `key` with everything below it. Returns whether it existed.
    fn delete_subtree(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError>;
    fn get_value(
        &self,
        root: &RegistryRoot,
        key: &RegistryPath,
        name: &str,
    ) -> Result<Option<RegistryValue>, StoreError>;
    /// Fails with `MissingParent` when `key` does not exist.
    fn set_value(
        &self,
        root: &RegistryRoot,
        key: &RegistryPath,
        name: &str,
        value: &RegistryValue,
    ) -> Result<(), StoreError>;
    fn delete_value(&self, root: &RegistryRoot, key: &RegistryPath, name: &str) -> Result<bool, StoreError>;
    /// SIDs of every user root the store holds.
    fn user_sids(&self) -> Result<Vec<String>, StoreError>;
}

/// Store kept entirely in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    hive: Mutex<Hive>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I, S>(sids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut hive = Hive::default();
        for sid in sids {
            hive.add_root(RegistryRoot::User(sid.into()));
        }
        Self { hive: Mutex::new(hive) }
    }

    pub fn snapshot(&self) -> Hive {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Hive> {
        self.hive.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RegistryStore for MemoryRegistry {
    fn create_key(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        self.lock().create_key(root, key)
    }

    fn key_exists(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        self.lock().key_exists(root, key)
    }

    fn delete_subtree(&self, root: &RegistryRoot, key: &RegistryPath) -> Result<bool, StoreError> {
        self.lock().delete_subtree(root, key)
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
        self.lock().set_value(root, key, name, value)
    }

    fn delete_value(&self, root: &RegistryRoot, key: &RegistryPath, name: &str) -> Result<bool, StoreError> {
        self.lock().delete_value(root, key, name)
    }

    fn user_sids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().user_sids())
    }
}
