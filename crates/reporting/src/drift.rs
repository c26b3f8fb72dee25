use gpfleet_core::report::{AgentPolicyReport, ReportState};

/// One line per drifted entry, named by its path from the top-level policy.
pub fn drift_lines(reports: &[AgentPolicyReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for report in reports {
        collect(report, "", &mut lines);
    }
    lines
}

fn collect(report: &AgentPolicyReport, prefix: &str, lines: &mut Vec<String>) {
    let path = if prefix.is_empty() {
        report.name.clone()
    } else {
        format!("{prefix}/{}", report.name)
    };
    if report.state == ReportState::Drifted {
        lines.push(format!(
            "{path}: expected {}, found {}",
            report.expected_value.as_deref().unwrap_or("absent"),
            report.actual_value.as_deref().unwrap_or("absent"),
        ));
    }
    for child in &report.child_reports {
        collect(child, &path, lines);
    }
}
