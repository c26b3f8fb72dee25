use gpfleet_core::report::ComplianceReport;

pub fn render_json(report: &ComplianceReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}
