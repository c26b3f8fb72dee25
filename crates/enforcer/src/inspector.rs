//! Compares a policy's intended end state with what the store holds.

use std::sync::Arc;

use tracing::debug;

use gpfleet_core::model::{
    ElementKind, PolicyDefinition, PolicyElement, PolicyElementItem, PolicyElementItemSelection,
    PolicyElementSelection, PolicyScope, PolicySelection, RegistryValue,
};
use gpfleet_core::paths::{RegistryPath, RegistryRoot};
use gpfleet_core::report::{AgentPolicyReport, ReportState};
use policy_engine::planner;

use crate::error::StoreError;
use crate::store::RegistryStore;

#[derive(Debug, Clone, Copy)]
pub struct InspectRequest<'a> {
    pub policy: &'a PolicyDefinition,
    pub expected_enabled: bool,
    /// Overrides the value the policy definition implies for its own key.
    pub expected_value: Option<&'a str>,
    pub user_sid: Option<&'a str>,
    /// Element choices to verify as child reports.
    pub selection: Option<&'a PolicySelection>,
}

impl<'a> InspectRequest<'a> {
    pub fn new(policy: &'a PolicyDefinition, expected_enabled: bool) -> Self {
        Self {
            policy,
            expected_enabled,
            expected_value: None,
            user_sid: None,
            selection: None,
        }
    }
}

#[derive(Clone)]
pub struct Inspector {
    store: Arc<dyn RegistryStore>,
}

impl Inspector {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    /// The top-level state reflects only the policy's own key; elements and
    /// items are reported separately in `child_reports`.
    pub fn inspect(&self, request: &InspectRequest<'_>) -> Result<AgentPolicyReport, StoreError> {
        let policy = request.policy;
        let root = inspection_root(policy, request.user_sid)?;

        let mut summary = if policy.list_keys.iter().any(|key| !key.trim().is_empty()) {
            self.inspect_list_keys(&root, request)?
        } else if policy.registry_key.trim().is_empty() {
            report(
                &policy.name,
                ReportState::NotApplied,
                None,
                None,
                "policy has no registry location",
            )
        } else {
            self.inspect_scalar(&root, request)?
        };
        summary.user_sid = match &root {
            RegistryRoot::User(sid) => Some(sid.clone()),
            RegistryRoot::Machine => None,
        };

        if request.expected_enabled {
            if let Some(selection) = request.selection {
                summary.child_reports = self.inspect_elements(&root, policy, selection)?;
            }
        }
        debug!(policy = %policy.name, state = ?summary.state, children = summary.child_reports.len(), "inspected");
        Ok(summary)
    }

    fn inspect_scalar(&self, root: &RegistryRoot, request: &InspectRequest<'_>) -> Result<AgentPolicyReport, StoreError> {
        let policy = request.policy;
        let key = RegistryPath::parse(&policy.registry_key);
        let actual = self.store.get_value(root, &key, &policy.value_name)?;
        let actual_text = actual.as_ref().map(RegistryValue::to_string);

        let expected = match request.expected_value {
            Some(text) => Some(text.trim().to_string()),
            None => planner::scalar_value(policy, request.expected_enabled, request.selection).map(|value| value.to_string()),
        };

        let Some(expected) = expected else {
            // Absence is the disabled state.
            return Ok(match actual_text {
                None => report(&policy.name, ReportState::Applied, None, None, "value absent as expected"),
                Some(actual) => report(
                    &policy.name,
                    ReportState::Drifted,
                    Some(actual),
                    None,
                    "value present but the policy should be absent",
                ),
            });
        };

        Ok(match &actual {
            None if !self.store.key_exists(root, &key)? => {
                report(&policy.name, ReportState::NotApplied, None, Some(expected), "key absent")
            }
            None => report(&policy.name, ReportState::NotApplied, None, Some(expected), "value absent"),
            Some(value) if matches_text(value, &expected) => {
                report(&policy.name, ReportState::Applied, actual_text, Some(expected), "value matches")
            }
            Some(_) => report(&policy.name, ReportState::Drifted, actual_text, Some(expected), "value differs"),
        })
    }

    fn inspect_list_keys(&self, root: &RegistryRoot, request: &InspectRequest<'_>) -> Result<AgentPolicyReport, StoreError> {
        let policy = request.policy;
        let keys: Vec<&str> = policy
            .list_keys
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .collect();

        let mut present = 0usize;
        let mut matching = 0usize;
        for key in &keys {
            let value = self
                .store
                .get_value(root, &RegistryPath::parse(key), &policy.value_name)?;
            if let Some(value) = value {
                present += 1;
                if value == RegistryValue::DWord(1) {
                    matching += 1;
                }
            }
        }

        let total = keys.len();
        let actual = Some(format!("{present} of {total} list keys set"));
        let (state, expected, reason) = if request.expected_enabled {
            let state = if matching == total {
                ReportState::Applied
            } else if present == 0 {
                ReportState::NotApplied
            } else {
                ReportState::Drifted
            };
            (state, Some("1".to_string()), "list keys should all be set")
        } else {
            let state = if present == 0 { ReportState::Applied } else { ReportState::Drifted };
            (state, None, "list keys should all be absent")
        };
        Ok(report(&policy.name, state, actual, expected, reason))
    }

    fn inspect_elements(
        &self,
        root: &RegistryRoot,
        policy: &PolicyDefinition,
        selection: &PolicySelection,
    ) -> Result<Vec<AgentPolicyReport>, StoreError> {
        let mut reports = Vec::new();
        for chosen in &selection.elements {
            let Some(element) = policy.find_element(&chosen.id_name) else {
                continue;
            };
            let (key, value_name) = planner::element_location(policy, element);

            let child = match element.kind {
                ElementKind::Enum => {
                    let picked = chosen.items.first();
                    match picked.and_then(|picked| element.find_item(&picked.name).map(|item| (item, picked))) {
                        Some((item, picked)) => {
                            let mut child = self.inspect_item(root, item, picked, key, value_name)?;
                            child.name = element.id_name.clone();
                            Some(child)
                        }
                        None => None,
                    }
                }
                ElementKind::List => Some(self.inspect_list_element(root, element, selection, chosen, key)?),
                _ => match planner::element_value(element, chosen) {
                    Some(expected) => Some(self.compare(root, &element.id_name, key, value_name, &expected)?),
                    None => None,
                },
            };
            reports.extend(child);
        }
        Ok(reports)
    }

    fn inspect_item(
        &self,
        root: &RegistryRoot,
        item: &PolicyElementItem,
        picked: &PolicyElementItemSelection,
        parent_key: &str,
        parent_value_name: &str,
    ) -> Result<AgentPolicyReport, StoreError> {
        let (key, value_name) = planner::item_location(item, parent_key, parent_value_name);

        let mut children = Vec::new();
        if picked.children.is_empty() {
            for child in &item.children {
                let implied = PolicyElementItemSelection {
                    name: child.name.clone(),
                    ..PolicyElementItemSelection::default()
                };
                children.push(self.inspect_item(root, child, &implied, key, value_name)?);
            }
        } else {
            for chosen in &picked.children {
                if let Some(child) = item.find_child(&chosen.name) {
                    children.push(self.inspect_item(root, child, chosen, key, value_name)?);
                }
            }
        }

        let mut item_report = match &item.value {
            Some(expected) => self.compare(root, &item.name, key, value_name, expected)?,
            None if children.is_empty() => {
                report(&item.name, ReportState::NotApplied, None, None, "item has nothing to compare")
            }
            None => report(&item.name, aggregate(&children), None, None, "item carries no value of its own"),
        };
        item_report.child_reports = children;
        Ok(item_report)
    }

    fn inspect_list_element(
        &self,
        root: &RegistryRoot,
        element: &PolicyElement,
        selection: &PolicySelection,
        chosen: &PolicyElementSelection,
        key: &str,
    ) -> Result<AgentPolicyReport, StoreError> {
        let path = RegistryPath::parse(key);
        if !self.store.key_exists(root, &path)? {
            return Ok(report(&element.id_name, ReportState::NotApplied, None, None, "list key absent"));
        }
        let mut children = Vec::new();
        for (entry_name, expected) in planner::list_entries(element, selection, chosen) {
            children.push(self.compare(root, &entry_name, key, &entry_name, &expected)?);
        }
        let state = match aggregate(&children) {
            _ if children.is_empty() => ReportState::Applied,
            ReportState::Applied => ReportState::Applied,
            _ => ReportState::Drifted,
        };
        let mut list_report = report(&element.id_name, state, None, None, "list entries");
        list_report.child_reports = children;
        Ok(list_report)
    }

    fn compare(
        &self,
        root: &RegistryRoot,
        name: &str,
        key: &str,
        value_name: &str,
        expected: &RegistryValue,
    ) -> Result<AgentPolicyReport, StoreError> {
        let path = RegistryPath::parse(key);
        let actual = self.store.get_value(root, &path, value_name)?;
        let expected_text = Some(expected.to_string());
        Ok(match actual {
            None => report(name, ReportState::NotApplied, None, expected_text, "value absent"),
            Some(actual) if actual == *expected => {
                report(name, ReportState::Applied, Some(actual.to_string()), expected_text, "value matches")
            }
            Some(actual) => report(name, ReportState::Drifted, Some(actual.to_string()), expected_text, "value differs"),
        })
    }
}

fn inspection_root(policy: &PolicyDefinition, user_sid: Option<&str>) -> Result<RegistryRoot, StoreError> {
    let sid = user_sid.map(str::trim).filter(|sid| !sid.is_empty());
    match (policy.scope, sid) {
        (PolicyScope::Machine, _) => Ok(RegistryRoot::Machine),
        (PolicyScope::User, Some(sid)) => Ok(RegistryRoot::User(sid.to_string())),
        (PolicyScope::User, None) => Err(StoreError::AmbiguousScope {
            key: policy.registry_key.clone(),
        }),
        (PolicyScope::Both | PolicyScope::None, Some(sid)) => Ok(RegistryRoot::User(sid.to_string())),
        (PolicyScope::Both | PolicyScope::None, None) => Ok(RegistryRoot::Machine),
    }
}

/// Compares a stored value with expected text in the stored value's kind.
fn matches_text(actual: &RegistryValue, expected: &str) -> bool {
    RegistryValue::parse(actual.kind(), expected).is_some_and(|expected| expected == *actual)
}

/// Applied only when every child is; NotApplied when none is present or
/// there are no children at all.
fn aggregate(children: &[AgentPolicyReport]) -> ReportState {
    if children.is_empty() {
        ReportState::NotApplied
    } else if children.iter().all(|child| child.state == ReportState::Applied) {
        ReportState::Applied
    } else if children.iter().all(|child| child.state == ReportState::NotApplied) {
        ReportState::NotApplied
    } else {
        ReportState::Drifted
    }
}

fn report(
    name: &str,
    state: ReportState,
    actual_value: Option<String>,
    expected_value: Option<String>,
    reason: &str,
) -> AgentPolicyReport {
    AgentPolicyReport {
        name: name.to_string(),
        state,
        actual_value,
        expected_value,
        reason: reason.to_string(),
        user_sid: None,
        child_reports: Vec::new(),
    }
}
