use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use gpfleet_core::paths::RegistryRoot;

/// One mutex per (policy, root). Applications of the same policy to the
/// same root run one at a time; anything else runs in parallel.
#[derive(Debug, Default)]
pub struct ScopeLocks {
    locks: Mutex<HashMap<(String, RegistryRoot), Arc<Mutex<()>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` while holding the lock for `(policy, root)`.
    pub fn with_lock<T>(&self, policy: &str, root: &RegistryRoot, work: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry((policy.to_lowercase(), root.clone()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        work()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
