use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use gpfleet_core::model::SupportedOnDefinition;

/// Lookup into the applicability catalog. Populated before first use, then read-only.
pub trait SupportedOnCatalog: Send + Sync {
    fn find(&self, name: &str) -> Option<&SupportedOnDefinition>;
}

/// In-memory catalog keyed by lowercase definition name.
#[derive(Debug, Clone, Default)]
pub struct SupportedOnTable {
    definitions: HashMap<String, SupportedOnDefinition>,
}

impl SupportedOnTable {
    pub fn new(definitions: Vec<SupportedOnDefinition>) -> Self {
        let definitions = definitions
            .into_iter()
            .map(|definition| (catalog_key(&definition.name), definition))
            .collect();
        Self { definitions }
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let definitions: Vec<SupportedOnDefinition> =
            serde_json::from_str(contents).context("parse supported-on catalog JSON")?;
        Ok(Self::new(definitions))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read supported-on catalog {}", path.display()))?;
        Self::from_json_str(&contents)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl SupportedOnCatalog for SupportedOnTable {
    fn find(&self, name: &str) -> Option<&SupportedOnDefinition> {
        self.definitions.get(&catalog_key(name))
    }
}

/// Names may carry an ADMX namespace prefix (`windows:SUPPORTED_X`).
pub(crate) fn catalog_key(name: &str) -> String {
    let bare = match name.rsplit_once(':') {
        Some((_, local)) => local,
        None => name,
    };
    bare.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case_and_namespace() {
        let table = SupportedOnTable::from_json_str(
            r#"[{"name":"SUPPORTED_Contoso","expression":{"kind":"reference","ref":"SUPPORTED_Windows7"}}]"#,
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.find("supported_contoso").is_some());
        assert!(table.find("contoso:SUPPORTED_Contoso").is_some());
        assert!(table.find("SUPPORTED_Other").is_none());
    }
}
