use gpfleet_core::report::{AgentPolicyReport, ComplianceReport, ReportState};

use crate::drift::drift_lines;
use crate::ComplianceStats;

pub fn human_summary(report: &ComplianceReport) -> String {
    let stats = ComplianceStats::from_reports(&report.reports);
    let headline = if stats.is_compliant() {
        format!("Agent {} is compliant with catalog {}.", report.agent_id, report.revision)
    } else {
        format!(
            "Agent {} is out of compliance with catalog {}.",
            report.agent_id, report.revision
        )
    };

    let mut lines = vec![
        headline,
        format!(
            "{} policies checked: {} applied, {} not applied, {} drifted.",
            stats.policies,
            count_top_level(&report.reports, ReportState::Applied),
            count_top_level(&report.reports, ReportState::NotApplied),
            count_top_level(&report.reports, ReportState::Drifted),
        ),
    ];
    if stats.policies_with_drift > 0 {
        lines.push(format!("{} policies show drift:", stats.policies_with_drift));
        lines.extend(drift_lines(&report.reports).into_iter().map(|line| format!("  {line}")));
    }
    lines.join("\n")
}

fn count_top_level(reports: &[AgentPolicyReport], state: ReportState) -> usize {
    reports.iter().filter(|report| report.state == state).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample;

    #[test]
    fn test_summary_lists_drift() {
        let summary = human_summary(&sample());
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "Agent agent-7 is out of compliance with catalog r4.");
        assert_eq!(lines[1], "3 policies checked: 2 applied, 1 not applied, 0 drifted.");
        assert_eq!(lines[2], "1 policies show drift:");
        assert_eq!(lines[3], "  Banner/Level: expected 3, found 0");
    }
}
