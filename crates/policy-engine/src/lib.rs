use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use gpfleet_core::model::{
    PolicyApplicationPlan, PolicyDefinition, PolicyEvaluationContext, PolicySelection,
};
use gpfleet_core::topology::{GpoTopology, RsopResult};

pub mod applicability;
pub mod catalog;
pub mod checker;
mod decision;
pub mod planner;
pub mod rsop;
pub mod rules;

pub use applicability::ApplicabilityResolver;
pub use catalog::{SupportedOnCatalog, SupportedOnTable};
pub use checker::ApplicabilityChecker;
pub use decision::{ApplicabilityDecision, ApplicabilityStatus};
pub use planner::{build_plan, PlanTarget};
pub use rsop::simulate_computer_rsop;

/// Outcome of checking one policy in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyApplicability {
    pub name: String,
    pub decision: ApplicabilityDecision,
}

/// Policy engine tying applicability, planning and RSOP together.
///
/// Every operation returns a value with a reason rather than an error, so a
/// single bad definition never aborts a batch.
#[derive(Clone)]
pub struct PolicyEngine {
    checker: ApplicabilityChecker,
}

impl PolicyEngine {
    pub fn new(catalog: Arc<dyn SupportedOnCatalog>) -> Self {
        Self {
            checker: ApplicabilityChecker::new(ApplicabilityResolver::new(catalog)),
        }
    }

    /// Builds an engine from a supported-on catalog file, or the built-in
    /// platform rules alone when no file is given.
    pub fn from_catalog_file(path: Option<&Path>) -> Result<Self> {
        let table = match path {
            Some(path) => SupportedOnTable::load(path)?,
            None => SupportedOnTable::default(),
        };
        debug!(definitions = table.len(), "supported-on catalog loaded");
        Ok(Self::new(Arc::new(table)))
    }

    pub fn check(&self, policy: &PolicyDefinition, context: &PolicyEvaluationContext) -> ApplicabilityDecision {
        self.checker.check(policy, context)
    }

    pub fn check_batch(
        &self,
        policies: &[PolicyDefinition],
        context: &PolicyEvaluationContext,
    ) -> Vec<PolicyApplicability> {
        policies
            .iter()
            .map(|policy| PolicyApplicability {
                name: policy.name.clone(),
                decision: self.check(policy, context),
            })
            .collect()
    }

    pub fn plan(
        &self,
        policy: &PolicyDefinition,
        enabled: bool,
        selection: Option<&PolicySelection>,
        target: &PlanTarget,
    ) -> PolicyApplicationPlan {
        build_plan(policy, enabled, selection, target)
    }

    pub fn simulate_rsop(&self, computer_dn: &str, topology: &GpoTopology) -> RsopResult {
        simulate_computer_rsop(computer_dn, topology)
    }

    pub fn checker(&self) -> &ApplicabilityChecker {
        &self.checker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use gpfleet_core::model::{OsProduct, OsVersion, PolicyScope};
    use tempfile::TempDir;

    fn policy(name: &str, supported_on: Option<&str>) -> PolicyDefinition {
        PolicyDefinition {
            name: name.to_string(),
            display_name: None,
            category: None,
            scope: PolicyScope::Machine,
            registry_key: "Software\\Policies\\Contoso".to_string(),
            value_name: name.to_string(),
            enabled_value: None,
            disabled_value: None,
            list_keys: Vec::new(),
            supported_on: supported_on.map(str::to_string),
            elements: Vec::new(),
        }
    }

    fn context() -> PolicyEvaluationContext {
        PolicyEvaluationContext {
            os_version: OsVersion::new(10, 0, Some(19045)),
            os_product: Some(OsProduct::Workstation),
        }
    }

    #[test]
    fn test_check_batch_keeps_going_past_bad_definitions() {
        let dir = TempDir::new().unwrap();
        let catalog = dir.path().join("supported-on.json");
        fs::write(
            &catalog,
            r#"[
                {"name": "SUPPORTED_Contoso", "expression": {"kind": "reference", "ref": "SUPPORTED_Windows7"}},
                {"name": "SUPPORTED_Weird", "expression": {"kind": "nand", "items": []}}
            ]"#,
        )
        .unwrap();
        let engine = PolicyEngine::from_catalog_file(Some(&catalog)).unwrap();

        let results = engine.check_batch(
            &[
                policy("Open", None),
                policy("Contoso", Some("SUPPORTED_Contoso")),
                policy("Weird", Some("SUPPORTED_Weird")),
                policy("Missing", Some("SUPPORTED_Missing")),
            ],
            &context(),
        );
        let statuses: Vec<ApplicabilityStatus> = results.iter().map(|result| result.decision.status).collect();
        assert_eq!(
            statuses,
            vec![
                ApplicabilityStatus::Applicable,
                ApplicabilityStatus::Applicable,
                ApplicabilityStatus::Unknown,
                ApplicabilityStatus::PolicyNotFound,
            ]
        );
        assert_eq!(results[3].name, "Missing");
    }

    #[test]
    fn test_engine_without_catalog_uses_builtins() {
        let engine = PolicyEngine::from_catalog_file(None).unwrap();
        let decision = engine.check(&policy("Win8", Some("SUPPORTED_Windows8")), &context());
        assert!(decision.is_applicable());

        let plan = engine.plan(&policy("Win8", None), true, None, &PlanTarget::machine());
        assert_eq!(plan.operations.len(), 1);
    }
}
