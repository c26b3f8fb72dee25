use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{OperationScope, RegistryOperation};

/// A store root. Machine operations land in the host-global root, user
/// operations always in a SID-scoped one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "root", content = "sid", rename_all = "lowercase")]
pub enum RegistryRoot {
    Machine,
    User(String),
}

impl RegistryRoot {
    /// Resolves the root for an operation. `None` when a user operation has no SID.
    pub fn for_operation(operation: &RegistryOperation, fallback_sid: Option<&str>) -> Option<Self> {
        match operation.scope {
            OperationScope::Machine => Some(RegistryRoot::Machine),
            OperationScope::User => operation
                .target_user_sid
                .as_deref()
                .or(fallback_sid)
                .filter(|sid| !sid.trim().is_empty())
                .map(|sid| RegistryRoot::User(sid.to_string())),
        }
    }
}

impl fmt::Display for RegistryRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryRoot::Machine => write!(f, "HKLM"),
            RegistryRoot::User(sid) => write!(f, "HKU\\{sid}"),
        }
    }
}

/// A key path below a root, compared case-insensitively like the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryPath {
    components: Vec<String>,
}

impl RegistryPath {
    pub fn parse(key: &str) -> Self {
        let components = key
            .split(['\\', '/'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_lowercase)
            .collect();
        Self { components }
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn starts_with(&self, other: &RegistryPath) -> bool {
        self.components.starts_with(&other.components)
    }

    pub fn normalized(&self) -> String {
        self.components.join("\\")
    }
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RegistryValue;

    #[test]
    fn test_paths_compare_case_insensitively() {
        let key = RegistryPath::parse("Software\\Policies\\Contoso\\");
        let other = RegistryPath::parse("software/policies/CONTOSO");
        assert_eq!(key, other);
        assert!(RegistryPath::parse("Software\\Policies\\Contoso\\Sub").starts_with(&key));
        assert!(!RegistryPath::parse("Software\\PoliciesX").starts_with(&key));
        assert!(RegistryPath::parse("\\").is_root());
    }

    #[test]
    fn test_root_resolution_is_never_ambiguous() {
        let machine = RegistryOperation::set(OperationScope::Machine, "K", "V", RegistryValue::DWord(1));
        assert_eq!(RegistryRoot::for_operation(&machine, Some("S-1")), Some(RegistryRoot::Machine));

        let user = RegistryOperation::set(OperationScope::User, "K", "V", RegistryValue::DWord(1));
        assert_eq!(RegistryRoot::for_operation(&user, None), None);
        assert_eq!(
            RegistryRoot::for_operation(&user, Some("S-1-5-21-9")),
            Some(RegistryRoot::User("S-1-5-21-9".to_string()))
        );

        let pinned = user.for_user(Some("S-1-5-21-1"));
        assert_eq!(
            RegistryRoot::for_operation(&pinned, Some("S-1-5-21-9")),
            Some(RegistryRoot::User("S-1-5-21-1".to_string()))
        );
    }
}
