use gpfleet_core::model::{PolicyDefinition, PolicyEvaluationContext};

use crate::applicability::ApplicabilityResolver;
use crate::decision::ApplicabilityDecision;

#[derive(Clone)]
pub struct ApplicabilityChecker {
    resolver: ApplicabilityResolver,
}

impl ApplicabilityChecker {
    pub fn new(resolver: ApplicabilityResolver) -> Self {
        Self { resolver }
    }

    pub fn check(&self, policy: &PolicyDefinition, context: &PolicyEvaluationContext) -> ApplicabilityDecision {
        match policy.supported_on.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
            None => ApplicabilityDecision::applicable("no applicability restriction"),
            Some(name) => self.resolver.resolve(name, context),
        }
    }

    pub fn resolver(&self) -> &ApplicabilityResolver {
        &self.resolver
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{SupportedOnCatalog, SupportedOnTable};
    use crate::decision::ApplicabilityStatus;
    use gpfleet_core::model::{OsVersion, PolicyScope, SupportedOnDefinition};

    /// Catalog that fails the test if it is ever consulted.
    struct UntouchableCatalog;

    impl SupportedOnCatalog for UntouchableCatalog {
        fn find(&self, name: &str) -> Option<&SupportedOnDefinition> {
            panic!("catalog consulted for {name}");
        }
    }

    fn policy(supported_on: Option<&str>) -> PolicyDefinition {
        PolicyDefinition {
            name: "NoAutorun".to_string(),
            display_name: None,
            category: None,
            scope: PolicyScope::Machine,
            registry_key: "Software\\Policies\\Contoso".to_string(),
            value_name: "NoAutorun".to_string(),
            enabled_value: None,
            disabled_value: None,
            list_keys: Vec::new(),
            supported_on: supported_on.map(str::to_string),
            elements: Vec::new(),
        }
    }

    fn context() -> PolicyEvaluationContext {
        PolicyEvaluationContext {
            os_version: OsVersion::new(6, 1, Some(7601)),
            os_product: None,
        }
    }

    #[test]
    fn test_unrestricted_policy_short_circuits() {
        let checker = ApplicabilityChecker::new(ApplicabilityResolver::new(Arc::new(UntouchableCatalog)));
        assert!(checker.check(&policy(None), &context()).is_applicable());
        assert!(checker.check(&policy(Some("  ")), &context()).is_applicable());
    }

    #[test]
    fn test_restricted_policy_delegates() {
        let checker = ApplicabilityChecker::new(ApplicabilityResolver::new(Arc::new(SupportedOnTable::default())));
        assert_eq!(
            checker.check(&policy(Some("SUPPORTED_Windows8")), &context()).status,
            ApplicabilityStatus::NotApplicable
        );
        assert_eq!(
            checker.check(&policy(Some("SUPPORTED_Unknown")), &context()).status,
            ApplicabilityStatus::PolicyNotFound
        );
    }
}
