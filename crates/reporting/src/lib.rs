use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use gpfleet_core::ids::Revision;
use gpfleet_core::report::{AgentPolicyReport, ComplianceReport, ReportState};

pub mod drift;
pub mod human;
pub mod json;
pub mod redact;

/// Counts over a set of policy reports. `policies` counts only top-level
/// reports; the state counters include every child report as well.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceStats {
    pub policies: u32,
    pub entries: u32,
    pub applied: u32,
    pub not_applied: u32,
    pub drifted: u32,
    /// Top-level policies with drift anywhere in their tree.
    pub policies_with_drift: u32,
}

impl ComplianceStats {
    pub fn from_reports(reports: &[AgentPolicyReport]) -> Self {
        let mut stats = ComplianceStats::default();
        for report in reports {
            stats.policies = stats.policies.saturating_add(1);
            if report.has_drift() {
                stats.policies_with_drift = stats.policies_with_drift.saturating_add(1);
            }
            stats.count(report);
        }
        stats
    }

    fn count(&mut self, report: &AgentPolicyReport) {
        self.entries = self.entries.saturating_add(1);
        match report.state {
            ReportState::Applied => self.applied = self.applied.saturating_add(1),
            ReportState::NotApplied => self.not_applied = self.not_applied.saturating_add(1),
            ReportState::Drifted => self.drifted = self.drifted.saturating_add(1),
        }
        for child in &report.child_reports {
            self.count(child);
        }
    }

    pub fn is_compliant(&self) -> bool {
        self.not_applied == 0 && self.drifted == 0
    }
}

pub fn build_report(agent_id: &str, revision: Revision, reports: Vec<AgentPolicyReport>) -> ComplianceReport {
    ComplianceReport {
        agent_id: agent_id.to_string(),
        revision,
        generated_at: OffsetDateTime::now_utc(),
        reports,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn entry(name: &str, state: ReportState, children: Vec<AgentPolicyReport>) -> AgentPolicyReport {
        AgentPolicyReport {
            name: name.to_string(),
            state,
            actual_value: None,
            expected_value: None,
            reason: String::new(),
            user_sid: None,
            child_reports: children,
        }
    }

    pub fn sample() -> ComplianceReport {
        let mut drifted = entry("Level", ReportState::Drifted, Vec::new());
        drifted.actual_value = Some("0".to_string());
        drifted.expected_value = Some("3".to_string());

        let mut wallpaper = entry("Wallpaper", ReportState::NotApplied, Vec::new());
        wallpaper.user_sid = Some("S-1-5-21-1004336348-1177238915-682003330-1001".to_string());

        build_report(
            "agent-7",
            Revision(4),
            vec![
                entry("Banner", ReportState::Applied, vec![drifted]),
                entry("NoAutorun", ReportState::Applied, Vec::new()),
                wallpaper,
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::sample;
    use super::*;

    #[test]
    fn test_stats_count_children() {
        let stats = ComplianceStats::from_reports(&sample().reports);
        assert_eq!(stats.policies, 3);
        assert_eq!(stats.entries, 4);
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.not_applied, 1);
        assert_eq!(stats.drifted, 1);
        assert_eq!(stats.policies_with_drift, 1);
        assert!(!stats.is_compliant());
        assert!(ComplianceStats::from_reports(&[]).is_compliant());
    }
}
