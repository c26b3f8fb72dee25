//! Directory topology: OUs, their GPO links, and RSOP output types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoInfo {
    pub guid: Uuid,
    pub name: String,
    /// A GPO with its computer settings disabled never reaches a computer's RSOP.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoLinkInfo {
    pub gpo: Uuid,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub enforced: bool,
    pub link_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuGpoLink {
    pub dn: String,
    #[serde(default)]
    pub block_inheritance: bool,
    #[serde(default)]
    pub links: Vec<GpoLinkInfo>,
}

/// Read-only snapshot of GPOs and OU links, keyed by normalized DN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpoTopology {
    gpos: HashMap<Uuid, GpoInfo>,
    ous: HashMap<String, OuGpoLink>,
}

impl GpoTopology {
    pub fn new(gpos: Vec<GpoInfo>, ous: Vec<OuGpoLink>) -> Self {
        let gpos = gpos.into_iter().map(|gpo| (gpo.guid, gpo)).collect();
        let ous = ous
            .into_iter()
            .map(|ou| (normalize_dn(&ou.dn), ou))
            .collect();
        Self { gpos, ous }
    }

    pub fn gpo(&self, guid: &Uuid) -> Option<&GpoInfo> {
        self.gpos.get(guid)
    }

    pub fn ou(&self, dn: &str) -> Option<&OuGpoLink> {
        self.ous.get(&normalize_dn(dn))
    }

    pub fn ou_count(&self) -> usize {
        self.ous.len()
    }
}

/// On-disk form of a topology, as exported by the directory collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyDocument {
    pub gpos: Vec<GpoInfo>,
    pub ous: Vec<OuGpoLink>,
}

impl From<TopologyDocument> for GpoTopology {
    fn from(document: TopologyDocument) -> Self {
        GpoTopology::new(document.gpos, document.ous)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsopAppliedGpo {
    pub gpo_name: String,
    pub gpo_guid: Uuid,
    pub enforced: bool,
    /// 1-based; 1 wins.
    pub precedence: u32,
    pub link_dn: String,
    pub link_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsopResult {
    pub computer_dn: String,
    pub applied: Vec<RsopAppliedGpo>,
}

impl RsopResult {
    pub fn gpo_names(&self) -> Vec<&str> {
        self.applied.iter().map(|gpo| gpo.gpo_name.as_str()).collect()
    }
}

fn default_true() -> bool {
    true
}

/// Splits a DN into its RDN components, honouring `\,` escapes.
pub fn split_dn(dn: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in dn.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            ',' => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts.retain(|part| !part.is_empty());
    parts
}

pub fn normalize_dn(dn: &str) -> String {
    split_dn(dn)
        .iter()
        .map(|part| match part.split_once('=') {
            Some((attr, value)) => format!("{}={}", attr.trim().to_lowercase(), value.trim().to_lowercase()),
            None => part.to_lowercase(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub fn rdn_attribute(rdn: &str) -> Option<String> {
    rdn.split_once('=').map(|(attr, _)| attr.trim().to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_dn_with_escapes() {
        let parts = split_dn("CN=PC\\,01, OU=Sales ,DC=corp,DC=local");
        assert_eq!(parts, vec!["CN=PC\\,01", "OU=Sales", "DC=corp", "DC=local"]);
    }

    #[test]
    fn test_topology_lookup_is_case_insensitive() {
        let topology = GpoTopology::new(
            Vec::new(),
            vec![OuGpoLink {
                dn: "OU=Sales,DC=Corp,DC=Local".to_string(),
                block_inheritance: true,
                links: Vec::new(),
            }],
        );
        assert!(topology.ou("ou=sales, dc=corp, dc=local").is_some());
        assert!(topology.ou("OU=Other,DC=corp,DC=local").is_none());
        assert_eq!(rdn_attribute("ou=Sales").as_deref(), Some("OU"));
    }
}
