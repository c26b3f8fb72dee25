use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::Revision;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Applied,
    NotApplied,
    Drifted,
}

/// Compliance of one policy (or one element/item of it) on an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPolicyReport {
    pub name: String,
    pub state: ReportState,
    pub actual_value: Option<String>,
    pub expected_value: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub user_sid: Option<String>,
    #[serde(default)]
    pub child_reports: Vec<AgentPolicyReport>,
}

impl AgentPolicyReport {
    /// True when this report or any descendant is drifted.
    pub fn has_drift(&self) -> bool {
        self.state == ReportState::Drifted || self.child_reports.iter().any(AgentPolicyReport::has_drift)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub agent_id: String,
    pub revision: Revision,
    pub generated_at: OffsetDateTime,
    pub reports: Vec<AgentPolicyReport>,
}
