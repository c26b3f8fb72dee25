//! Policy catalog value types.
//!
//! Everything in here is plain data. Definitions arrive already parsed from
//! the ADMX/ADML importer; the engine only reads them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::ids::PolicyHash;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    None,
    User,
    Machine,
    Both,
}

impl PolicyScope {
    pub fn as_code(&self) -> i64 {
        match self {
            PolicyScope::None => 0,
            PolicyScope::User => 1,
            PolicyScope::Machine => 2,
            PolicyScope::Both => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PolicyScope::None),
            1 => Some(PolicyScope::User),
            2 => Some(PolicyScope::Machine),
            3 => Some(PolicyScope::Both),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            PolicyScope::None => "none",
            PolicyScope::User => "user",
            PolicyScope::Machine => "machine",
            PolicyScope::Both => "both",
        };
        write!(f, "{value}")
    }
}

impl FromStr for PolicyScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "none" => Ok(PolicyScope::None),
            "user" => Ok(PolicyScope::User),
            "machine" => Ok(PolicyScope::Machine),
            "both" => Ok(PolicyScope::Both),
            _ => Err(format!("unknown policy scope: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    DWord,
    QWord,
    String,
    ExpandString,
    MultiString,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::DWord => "dword",
            ValueKind::QWord => "qword",
            ValueKind::String => "string",
            ValueKind::ExpandString => "expand_string",
            ValueKind::MultiString => "multi_string",
        }
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dword" => Ok(ValueKind::DWord),
            "qword" => Ok(ValueKind::QWord),
            "string" => Ok(ValueKind::String),
            "expand_string" => Ok(ValueKind::ExpandString),
            "multi_string" => Ok(ValueKind::MultiString),
            _ => Err(format!("unknown value kind: {value}")),
        }
    }
}

/// A typed value as stored under a registry-equivalent key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RegistryValue {
    DWord(u32),
    QWord(u64),
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
}

impl RegistryValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            RegistryValue::DWord(_) => ValueKind::DWord,
            RegistryValue::QWord(_) => ValueKind::QWord,
            RegistryValue::String(_) => ValueKind::String,
            RegistryValue::ExpandString(_) => ValueKind::ExpandString,
            RegistryValue::MultiString(_) => ValueKind::MultiString,
        }
    }

    /// Rebuilds a value from its kind and textual form.
    pub fn parse(kind: ValueKind, text: &str) -> Option<Self> {
        match kind {
            ValueKind::DWord => text.trim().parse().ok().map(RegistryValue::DWord),
            ValueKind::QWord => text.trim().parse().ok().map(RegistryValue::QWord),
            ValueKind::String => Some(RegistryValue::String(text.to_string())),
            ValueKind::ExpandString => Some(RegistryValue::ExpandString(text.to_string())),
            ValueKind::MultiString => Some(RegistryValue::MultiString(
                text.split('\0')
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            RegistryValue::DWord(value) => value.to_string(),
            RegistryValue::QWord(value) => value.to_string(),
            RegistryValue::String(value) | RegistryValue::ExpandString(value) => value.clone(),
            RegistryValue::MultiString(values) => values.join("\0"),
        }
    }
}

impl fmt::Display for RegistryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryValue::MultiString(values) => write!(f, "{}", values.join(";")),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Decimal,
    Boolean,
    Text,
    MultiText,
    Enum,
    List,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Decimal => "decimal",
            ElementKind::Boolean => "boolean",
            ElementKind::Text => "text",
            ElementKind::MultiText => "multi_text",
            ElementKind::Enum => "enum",
            ElementKind::List => "list",
        }
    }
}

impl FromStr for ElementKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "decimal" => Ok(ElementKind::Decimal),
            "boolean" => Ok(ElementKind::Boolean),
            "text" => Ok(ElementKind::Text),
            "multi_text" => Ok(ElementKind::MultiText),
            "enum" => Ok(ElementKind::Enum),
            "list" => Ok(ElementKind::List),
            _ => Err(format!("unknown element kind: {value}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementConstraints {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min_value: Option<u64>,
    #[serde(default)]
    pub max_value: Option<u64>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub value_prefix: Option<String>,
}

/// Where an element item hangs in the element tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemParentType {
    Element,
    Item,
}

impl ItemParentType {
    pub fn as_code(&self) -> i64 {
        match self {
            ItemParentType::Element => 0,
            ItemParentType::Item => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ItemParentType::Element),
            1 => Some(ItemParentType::Item),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyElementItem {
    pub name: String,
    #[serde(default)]
    pub registry_key: Option<String>,
    #[serde(default)]
    pub value_name: Option<String>,
    #[serde(default)]
    pub value: Option<RegistryValue>,
    #[serde(default)]
    pub children: Vec<PolicyElementItem>,
}

impl PolicyElementItem {
    pub fn find_child(&self, name: &str) -> Option<&PolicyElementItem> {
        self.children.iter().find(|child| child.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyElement {
    pub id_name: String,
    pub kind: ElementKind,
    #[serde(default)]
    pub registry_key: Option<String>,
    #[serde(default)]
    pub value_name: Option<String>,
    #[serde(default)]
    pub constraints: ElementConstraints,
    #[serde(default)]
    pub items: Vec<PolicyElementItem>,
}

impl PolicyElement {
    pub fn find_item(&self, name: &str) -> Option<&PolicyElementItem> {
        self.items.iter().find(|item| item.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub scope: PolicyScope,
    pub registry_key: String,
    #[serde(default)]
    pub value_name: String,
    #[serde(default)]
    pub enabled_value: Option<u32>,
    #[serde(default)]
    pub disabled_value: Option<u32>,
    #[serde(default)]
    pub list_keys: Vec<String>,
    #[serde(default)]
    pub supported_on: Option<String>,
    #[serde(default)]
    pub elements: Vec<PolicyElement>,
}

impl PolicyDefinition {
    /// Identity key used to dedupe definitions and to join catalog copies.
    pub fn hash(&self) -> PolicyHash {
        PolicyHash::compute(&self.name, self.scope, &self.registry_key, &self.value_name)
    }

    pub fn find_element(&self, id_name: &str) -> Option<&PolicyElement> {
        self.elements.iter().find(|element| element.id_name == id_name)
    }
}

/// Applicability restriction tree. Unknown tags deserialize to `Malformed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SupportedOnExpression {
    Reference {
        #[serde(rename = "ref")]
        reference: String,
    },
    Range {
        #[serde(rename = "ref")]
        reference: String,
        #[serde(default)]
        min_version_index: Option<u32>,
        #[serde(default)]
        max_version_index: Option<u32>,
    },
    And {
        items: Vec<SupportedOnExpression>,
    },
    Or {
        items: Vec<SupportedOnExpression>,
    },
    #[serde(other)]
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedOnDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub expression: SupportedOnExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
    #[serde(default)]
    pub build: Option<u32>,
    #[serde(default)]
    pub revision: Option<u32>,
}

impl OsVersion {
    pub fn new(major: u32, minor: u32, build: Option<u32>) -> Self {
        Self {
            major,
            minor,
            build,
            revision: None,
        }
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl FromStr for OsVersion {
    type Err = FleetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || FleetError::InvalidVersion(value.to_string());
        let mut parts = value.trim().split('.');
        let major = parts
            .next()
            .and_then(|part| part.parse().ok())
            .ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(part) => part.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let build = match parts.next() {
            Some(part) => Some(part.parse().map_err(|_| invalid())?),
            None => None,
        };
        let revision = match parts.next() {
            Some(part) => Some(part.parse().map_err(|_| invalid())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            major,
            minor,
            build,
            revision,
        })
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{build}")?;
            if let Some(revision) = self.revision {
                write!(f, ".{revision}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OsProduct {
    Workstation,
    Server,
}

impl FromStr for OsProduct {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "workstation" | "client" => Ok(OsProduct::Workstation),
            "server" => Ok(OsProduct::Server),
            _ => Err(format!("unknown os product: {value}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluationContext {
    pub os_version: OsVersion,
    #[serde(default)]
    pub os_product: Option<OsProduct>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyElementItemSelection {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub children: Vec<PolicyElementItemSelection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyElementSelection {
    pub id_name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub items: Vec<PolicyElementItemSelection>,
}

/// A concrete user choice for one policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySelection {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub list_keys: Vec<String>,
    #[serde(default)]
    pub elements: Vec<PolicyElementSelection>,
}

impl PolicySelection {
    pub fn element(&self, id_name: &str) -> Option<&PolicyElementSelection> {
        self.elements.iter().find(|element| element.id_name == id_name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationScope {
    Machine,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryOperation {
    pub scope: OperationScope,
    pub key: String,
    pub value_name: String,
    pub value_kind: ValueKind,
    pub value: Option<RegistryValue>,
    pub delete: bool,
    #[serde(default)]
    pub target_user_sid: Option<String>,
}

impl RegistryOperation {
    pub fn set(scope: OperationScope, key: &str, value_name: &str, value: RegistryValue) -> Self {
        Self {
            scope,
            key: key.to_string(),
            value_name: value_name.to_string(),
            value_kind: value.kind(),
            value: Some(value),
            delete: false,
            target_user_sid: None,
        }
    }

    /// An empty `value_name` removes the whole key subtree.
    pub fn delete(scope: OperationScope, key: &str, value_name: &str) -> Self {
        Self {
            scope,
            key: key.to_string(),
            value_name: value_name.to_string(),
            value_kind: ValueKind::DWord,
            value: None,
            delete: true,
            target_user_sid: None,
        }
    }

    pub fn for_user(mut self, sid: Option<&str>) -> Self {
        if self.scope == OperationScope::User {
            self.target_user_sid = sid.map(str::to_string);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyApplicationPlan {
    pub policy_name: String,
    pub operations: Vec<RegistryOperation>,
}

impl PolicyApplicationPlan {
    pub fn empty(policy_name: &str) -> Self {
        Self {
            policy_name: policy_name.to_string(),
            operations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Who a plan is being applied for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionTarget {
    Machine,
    User { sid: String },
    Group { name: String, member_sids: Vec<String> },
    Global,
}

impl ExecutionTarget {
    pub fn label(&self) -> String {
        match self {
            ExecutionTarget::Machine => "machine".to_string(),
            ExecutionTarget::User { sid } => format!("user {sid}"),
            ExecutionTarget::Group { name, .. } => format!("group {name}"),
            ExecutionTarget::Global => "global".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_version_parse() {
        let version: OsVersion = "10.0.19045".parse().unwrap();
        assert_eq!(version.major, 10);
        assert_eq!(version.minor, 0);
        assert_eq!(version.build, Some(19045));
        assert_eq!(version.revision, None);
        assert_eq!(version.to_string(), "10.0.19045");

        let short: OsVersion = "6".parse().unwrap();
        assert_eq!(short, OsVersion::new(6, 0, None));

        assert!("ten.0".parse::<OsVersion>().is_err());
        assert!("10.0.1.2.3".parse::<OsVersion>().is_err());
    }

    #[test]
    fn test_unknown_expression_tag_is_malformed() {
        let json = r#"{"kind":"xor","items":[]}"#;
        let expression: SupportedOnExpression = serde_json::from_str(json).unwrap();
        assert_eq!(expression, SupportedOnExpression::Malformed);

        let json = r#"{"kind":"range","ref":"products:windows","min_version_index":7601}"#;
        let expression: SupportedOnExpression = serde_json::from_str(json).unwrap();
        assert!(matches!(
            expression,
            SupportedOnExpression::Range { min_version_index: Some(7601), max_version_index: None, .. }
        ));
    }

    #[test]
    fn test_registry_value_text() {
        let value = RegistryValue::parse(ValueKind::DWord, " 42 ").unwrap();
        assert_eq!(value, RegistryValue::DWord(42));
        assert_eq!(value.to_string(), "42");
        assert!(RegistryValue::parse(ValueKind::DWord, "x").is_none());

        let multi = RegistryValue::MultiString(vec!["a".to_string(), "b".to_string()]);
        let text = multi.to_text();
        assert_eq!(RegistryValue::parse(ValueKind::MultiString, &text), Some(multi));
    }

    #[test]
    fn test_user_sid_only_on_user_operations() {
        let machine = RegistryOperation::delete(OperationScope::Machine, "Software\\A", "V")
            .for_user(Some("S-1-5-21-1"));
        assert_eq!(machine.target_user_sid, None);

        let user = RegistryOperation::delete(OperationScope::User, "Software\\A", "V")
            .for_user(Some("S-1-5-21-1"));
        assert_eq!(user.target_user_sid.as_deref(), Some("S-1-5-21-1"));
    }
}
