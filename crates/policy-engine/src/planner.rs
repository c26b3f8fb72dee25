//! Turns a policy definition plus a choice into registry operations.
//!
//! Plans are a pure function of their inputs: the same policy, flag and
//! selection always give the same operations in the same order.

use tracing::debug;

use gpfleet_core::model::{
    ElementKind, OperationScope, PolicyApplicationPlan, PolicyDefinition, PolicyElement,
    PolicyElementItem, PolicyElementItemSelection, PolicyElementSelection, PolicyScope,
    PolicySelection, RegistryOperation, RegistryValue,
};

/// Scope and user a plan is built for when the policy itself allows both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTarget {
    pub scope: OperationScope,
    pub user_sid: Option<String>,
}

impl PlanTarget {
    pub fn machine() -> Self {
        Self {
            scope: OperationScope::Machine,
            user_sid: None,
        }
    }

    pub fn user(sid: Option<&str>) -> Self {
        Self {
            scope: OperationScope::User,
            user_sid: sid.map(str::to_string),
        }
    }
}

pub fn build_plan(
    policy: &PolicyDefinition,
    enabled: bool,
    selection: Option<&PolicySelection>,
    target: &PlanTarget,
) -> PolicyApplicationPlan {
    let scope = operation_scope(policy.scope, target);
    let sid = target.user_sid.as_deref();
    let mut operations = Vec::new();

    let list_keys: Vec<&str> = policy
        .list_keys
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .collect();

    if !list_keys.is_empty() {
        for key in list_keys {
            let operation = if enabled {
                RegistryOperation::set(scope, key, &policy.value_name, RegistryValue::DWord(1))
            } else {
                RegistryOperation::delete(scope, key, &policy.value_name)
            };
            operations.push(operation.for_user(sid));
        }
    } else if policy.registry_key.trim().is_empty() {
        debug!(policy = %policy.name, "policy has neither a key nor list keys; plan is empty");
        return PolicyApplicationPlan::empty(&policy.name);
    } else {
        let operation = match scalar_value(policy, enabled, selection) {
            Some(value) => RegistryOperation::set(
                scope,
                &policy.registry_key,
                &policy.value_name,
                RegistryValue::DWord(value),
            ),
            None => RegistryOperation::delete(scope, &policy.registry_key, &policy.value_name),
        };
        operations.push(operation.for_user(sid));
    }

    if enabled {
        if let Some(selection) = selection {
            for operation in element_operations(policy, selection, scope) {
                operations.push(operation.for_user(sid));
            }
        }
    }

    PolicyApplicationPlan {
        policy_name: policy.name.clone(),
        operations,
    }
}

fn operation_scope(policy_scope: PolicyScope, target: &PlanTarget) -> OperationScope {
    match policy_scope {
        PolicyScope::Machine => OperationScope::Machine,
        PolicyScope::User => OperationScope::User,
        PolicyScope::Both | PolicyScope::None => target.scope,
    }
}

/// Value the policy's own (key, value name) holds in the given state.
/// `None` means the value is absent, which is how a policy without a
/// `DisabledValue` is disabled.
pub fn scalar_value(policy: &PolicyDefinition, enabled: bool, selection: Option<&PolicySelection>) -> Option<u32> {
    if enabled {
        Some(selected_scalar(policy, selection).or(policy.enabled_value).unwrap_or(1))
    } else {
        policy.disabled_value
    }
}

fn selected_scalar(policy: &PolicyDefinition, selection: Option<&PolicySelection>) -> Option<u32> {
    let text = selection?.value.as_deref()?;
    match text.trim().parse::<u32>() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!(policy = %policy.name, value = text, "ignoring non-numeric scalar selection");
            None
        }
    }
}

fn element_operations(
    policy: &PolicyDefinition,
    selection: &PolicySelection,
    scope: OperationScope,
) -> Vec<RegistryOperation> {
    let mut operations = Vec::new();
    for chosen in &selection.elements {
        let Some(element) = policy.find_element(&chosen.id_name) else {
            debug!(policy = %policy.name, element = %chosen.id_name, "selection names an unknown element");
            continue;
        };
        let (key, value_name) = element_location(policy, element);

        match element.kind {
            ElementKind::Enum => {
                let Some(picked) = chosen.items.first() else {
                    continue;
                };
                let Some(item) = element.find_item(&picked.name) else {
                    debug!(policy = %policy.name, item = %picked.name, "selection names an unknown enum item");
                    continue;
                };
                item_operations(item, picked, key, value_name, scope, &mut operations);
            }
            ElementKind::List => {
                // Clearing a list that shares the policy key would wipe the policy value.
                if !key.eq_ignore_ascii_case(&policy.registry_key) {
                    operations.push(RegistryOperation::delete(scope, key, ""));
                }
                for (entry_name, value) in list_entries(element, selection, chosen) {
                    operations.push(RegistryOperation::set(scope, key, &entry_name, value));
                }
            }
            _ => {
                if let Some(value) = element_value(element, chosen) {
                    operations.push(RegistryOperation::set(scope, key, value_name, value));
                }
            }
        }
    }
    operations
}

/// Key and value name an element writes to, falling back to the policy key.
pub fn element_location<'a>(policy: &'a PolicyDefinition, element: &'a PolicyElement) -> (&'a str, &'a str) {
    let key = element
        .registry_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .unwrap_or(&policy.registry_key);
    (key, element.value_name.as_deref().unwrap_or(""))
}

/// Key and value name an enum item writes to, falling back to its parent's.
pub fn item_location<'a>(
    item: &'a PolicyElementItem,
    parent_key: &'a str,
    parent_value_name: &'a str,
) -> (&'a str, &'a str) {
    let key = item
        .registry_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
        .unwrap_or(parent_key);
    (key, item.value_name.as_deref().unwrap_or(parent_value_name))
}

/// Value a scalar element (decimal, boolean, text, multi-text) writes for a
/// selection. `None` for enum and list elements or unusable input.
pub fn element_value(element: &PolicyElement, chosen: &PolicyElementSelection) -> Option<RegistryValue> {
    let text = chosen.value.as_deref()?;
    match element.kind {
        ElementKind::Decimal => {
            let value = clamp(element, text.trim().parse::<u64>().ok()?);
            Some(RegistryValue::DWord(u32::try_from(value).unwrap_or(u32::MAX)))
        }
        ElementKind::Boolean => parse_flag(text).map(|flag| RegistryValue::DWord(u32::from(flag))),
        ElementKind::Text => Some(RegistryValue::String(truncate(element, text))),
        ElementKind::MultiText => Some(RegistryValue::MultiString(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        ElementKind::Enum | ElementKind::List => None,
    }
}

/// Value names and values a list element holds for a selection. Entries come
/// from the element's item selections, or the selection's list keys when it
/// names none.
pub fn list_entries(
    element: &PolicyElement,
    selection: &PolicySelection,
    chosen: &PolicyElementSelection,
) -> Vec<(String, RegistryValue)> {
    let entries: Vec<(String, String)> = if chosen.items.is_empty() {
        selection
            .list_keys
            .iter()
            .map(|entry| (entry.clone(), entry.clone()))
            .collect()
    } else {
        chosen
            .items
            .iter()
            .map(|entry| (entry.name.clone(), entry.value.clone().unwrap_or_else(|| entry.name.clone())))
            .collect()
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(index, (name, value))| {
            let entry_name = match &element.constraints.value_prefix {
                Some(prefix) => format!("{prefix}{}", index + 1),
                None => name,
            };
            (entry_name, RegistryValue::String(value))
        })
        .collect()
}

/// Writes an item's own value, then its nested items. When the selection
/// names children only those are followed, otherwise every child is.
fn item_operations(
    item: &PolicyElementItem,
    picked: &PolicyElementItemSelection,
    parent_key: &str,
    parent_value_name: &str,
    scope: OperationScope,
    operations: &mut Vec<RegistryOperation>,
) {
    let (key, value_name) = item_location(item, parent_key, parent_value_name);
    if let Some(value) = &item.value {
        operations.push(RegistryOperation::set(scope, key, value_name, value.clone()));
    }

    if picked.children.is_empty() {
        for child in &item.children {
            let implied = PolicyElementItemSelection {
                name: child.name.clone(),
                value: None,
                children: Vec::new(),
            };
            item_operations(child, &implied, key, value_name, scope, operations);
        }
    } else {
        for chosen in &picked.children {
            if let Some(child) = item.find_child(&chosen.name) {
                item_operations(child, chosen, key, value_name, scope, operations);
            }
        }
    }
}

fn clamp(element: &PolicyElement, value: u64) -> u64 {
    let value = element.constraints.min_value.map_or(value, |min| value.max(min));
    element.constraints.max_value.map_or(value, |max| value.min(max))
}

fn truncate(element: &PolicyElement, text: &str) -> String {
    match element.constraints.max_length {
        Some(max) => text.chars().take(max as usize).collect(),
        None => text.to_string(),
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfleet_core::model::{ElementConstraints, ValueKind};

    fn scalar_policy() -> PolicyDefinition {
        PolicyDefinition {
            name: "DisableCamera".to_string(),
            display_name: None,
            category: None,
            scope: PolicyScope::Machine,
            registry_key: "Software\\Policies\\Contoso\\Camera".to_string(),
            value_name: "AllowCamera".to_string(),
            enabled_value: Some(0),
            disabled_value: None,
            list_keys: Vec::new(),
            supported_on: None,
            elements: Vec::new(),
        }
    }

    fn enum_policy() -> PolicyDefinition {
        let mut policy = scalar_policy();
        policy.name = "UpdateMode".to_string();
        policy.scope = PolicyScope::Both;
        policy.elements = vec![
            PolicyElement {
                id_name: "Mode".to_string(),
                kind: ElementKind::Enum,
                registry_key: None,
                value_name: Some("Mode".to_string()),
                constraints: ElementConstraints::default(),
                items: vec![
                    PolicyElementItem {
                        name: "Auto".to_string(),
                        registry_key: None,
                        value_name: None,
                        value: Some(RegistryValue::DWord(4)),
                        children: vec![PolicyElementItem {
                            name: "Hour".to_string(),
                            registry_key: None,
                            value_name: Some("ScheduledHour".to_string()),
                            value: Some(RegistryValue::DWord(3)),
                            children: Vec::new(),
                        }],
                    },
                    PolicyElementItem {
                        name: "Notify".to_string(),
                        registry_key: None,
                        value_name: None,
                        value: Some(RegistryValue::DWord(2)),
                        children: Vec::new(),
                    },
                ],
            },
            PolicyElement {
                id_name: "Servers".to_string(),
                kind: ElementKind::List,
                registry_key: Some("Software\\Policies\\Contoso\\Servers".to_string()),
                value_name: None,
                constraints: ElementConstraints {
                    value_prefix: Some("Server".to_string()),
                    ..ElementConstraints::default()
                },
                items: Vec::new(),
            },
            PolicyElement {
                id_name: "Retries".to_string(),
                kind: ElementKind::Decimal,
                registry_key: None,
                value_name: Some("Retries".to_string()),
                constraints: ElementConstraints {
                    max_value: Some(10),
                    ..ElementConstraints::default()
                },
                items: Vec::new(),
            },
        ];
        policy
    }

    #[test]
    fn test_list_keys_are_set_uniformly() {
        let mut policy = scalar_policy();
        policy.list_keys = vec!["Software\\A".to_string(), " ".to_string(), "Software\\B".to_string()];

        let enabled = build_plan(&policy, true, None, &PlanTarget::machine());
        assert_eq!(enabled.operations.len(), 2);
        assert!(enabled.operations.iter().all(|op| !op.delete && op.value == Some(RegistryValue::DWord(1))));

        let disabled = build_plan(&policy, false, None, &PlanTarget::machine());
        assert_eq!(disabled.operations.len(), 2);
        assert!(disabled.operations.iter().all(|op| op.delete));
        assert!(disabled.operations.iter().all(|op| op.key != policy.registry_key));
    }

    #[test]
    fn test_disable_without_disabled_value_deletes() {
        let plan = build_plan(&scalar_policy(), false, None, &PlanTarget::machine());
        assert_eq!(plan.operations.len(), 1);
        let op = &plan.operations[0];
        assert!(op.delete);
        assert_eq!(op.key, "Software\\Policies\\Contoso\\Camera");
        assert_eq!(op.value_name, "AllowCamera");
    }

    #[test]
    fn test_set_values() {
        let plan = build_plan(&scalar_policy(), true, None, &PlanTarget::machine());
        assert_eq!(plan.operations[0].value, Some(RegistryValue::DWord(0)));
        assert_eq!(plan.operations[0].value_kind, ValueKind::DWord);

        let mut policy = scalar_policy();
        policy.enabled_value = None;
        policy.disabled_value = Some(7);
        let enabled = build_plan(&policy, true, None, &PlanTarget::machine());
        assert_eq!(enabled.operations[0].value, Some(RegistryValue::DWord(1)));
        let disabled = build_plan(&policy, false, None, &PlanTarget::machine());
        assert_eq!(disabled.operations[0].value, Some(RegistryValue::DWord(7)));
        assert!(!disabled.operations[0].delete);

        let selection = PolicySelection {
            value: Some("12".to_string()),
            ..PolicySelection::default()
        };
        let overridden = build_plan(&policy, true, Some(&selection), &PlanTarget::machine());
        assert_eq!(overridden.operations[0].value, Some(RegistryValue::DWord(12)));
    }

    #[test]
    fn test_malformed_policy_gives_empty_plan() {
        let mut policy = scalar_policy();
        policy.registry_key = String::new();
        let plan = build_plan(&policy, true, None, &PlanTarget::machine());
        assert!(plan.is_empty());
        assert_eq!(plan.policy_name, "DisableCamera");
    }

    #[test]
    fn test_scope_follows_policy_then_target() {
        let machine = build_plan(&scalar_policy(), true, None, &PlanTarget::user(Some("S-1-5-21-7")));
        assert_eq!(machine.operations[0].scope, OperationScope::Machine);
        assert_eq!(machine.operations[0].target_user_sid, None);

        let both = build_plan(&enum_policy(), true, None, &PlanTarget::user(Some("S-1-5-21-7")));
        assert_eq!(both.operations[0].scope, OperationScope::User);
        assert_eq!(both.operations[0].target_user_sid.as_deref(), Some("S-1-5-21-7"));
    }

    #[test]
    fn test_element_selection_operations() {
        let selection = PolicySelection {
            value: None,
            list_keys: vec!["wsus1".to_string(), "wsus2".to_string()],
            elements: vec![
                PolicyElementSelection {
                    id_name: "Mode".to_string(),
                    value: None,
                    items: vec![PolicyElementItemSelection {
                        name: "Auto".to_string(),
                        value: None,
                        children: Vec::new(),
                    }],
                },
                PolicyElementSelection {
                    id_name: "Servers".to_string(),
                    value: None,
                    items: Vec::new(),
                },
                PolicyElementSelection {
                    id_name: "Retries".to_string(),
                    value: Some("50".to_string()),
                    items: Vec::new(),
                },
            ],
        };
        let plan = build_plan(&enum_policy(), true, Some(&selection), &PlanTarget::machine());
        let summary: Vec<(String, bool, Option<RegistryValue>)> = plan
            .operations
            .iter()
            .map(|op| (op.value_name.clone(), op.delete, op.value.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("AllowCamera".to_string(), false, Some(RegistryValue::DWord(0))),
                ("Mode".to_string(), false, Some(RegistryValue::DWord(4))),
                ("ScheduledHour".to_string(), false, Some(RegistryValue::DWord(3))),
                (String::new(), true, None),
                ("Server1".to_string(), false, Some(RegistryValue::String("wsus1".to_string()))),
                ("Server2".to_string(), false, Some(RegistryValue::String("wsus2".to_string()))),
                ("Retries".to_string(), false, Some(RegistryValue::DWord(10))),
            ]
        );

        let disabled = build_plan(&enum_policy(), false, Some(&selection), &PlanTarget::machine());
        assert_eq!(disabled.operations.len(), 1);
    }

    #[test]
    fn test_plans_are_deterministic() {
        let selection = PolicySelection {
            elements: vec![PolicyElementSelection {
                id_name: "Mode".to_string(),
                value: None,
                items: vec![PolicyElementItemSelection {
                    name: "Notify".to_string(),
                    value: None,
                    children: Vec::new(),
                }],
            }],
            ..PolicySelection::default()
        };
        let policy = enum_policy();
        let target = PlanTarget::user(Some("S-1-5-21-3"));
        let first = build_plan(&policy, true, Some(&selection), &target);
        let second = build_plan(&policy, true, Some(&selection), &target);
        assert_eq!(first, second);
    }
}
