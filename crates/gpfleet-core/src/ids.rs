use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::PolicyScope;

/// Content hash of (Name, Scope, RegistryKey, ValueName), hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyHash(pub String);

/// Catalog revision. Never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revision(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncSessionId(pub Uuid);

impl PolicyHash {
    pub fn compute(name: &str, scope: PolicyScope, registry_key: &str, value_name: &str) -> Self {
        let scope = scope.to_string();
        let registry_key = registry_key.to_lowercase();
        let value_name = value_name.to_lowercase();
        let mut hasher = Sha256::new();
        for field in [name, scope.as_str(), registry_key.as_str(), value_name.as_str()] {
            hasher.update(field.as_bytes());
            hasher.update([0x1f]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Revision {
    pub const INITIAL: Revision = Revision(0);

    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl SyncSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_hash_is_stable() {
        let first = PolicyHash::compute("NoAutorun", PolicyScope::Machine, "Software\\Policies\\X", "NoAutorun");
        let second = PolicyHash::compute("NoAutorun", PolicyScope::Machine, "software\\policies\\x", "noautorun");
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 64);

        let other_scope = PolicyHash::compute("NoAutorun", PolicyScope::User, "Software\\Policies\\X", "NoAutorun");
        assert_ne!(first, other_scope);
    }

    #[test]
    fn test_revision_ordering() {
        assert!(Revision(3) > Revision(2));
        assert_eq!(Revision::INITIAL.next(), Revision(1));
        assert_eq!(Revision(7).to_string(), "r7");
    }
}
