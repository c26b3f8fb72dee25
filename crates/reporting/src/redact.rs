use gpfleet_core::report::{AgentPolicyReport, ComplianceReport};

/// Keeps the authority prefix and RID of a SID and hides the domain part,
/// e.g. `S-1-5-21-1-2-3-1001` becomes `S-1-5-21-*-1001`.
pub fn redact_sid(sid: &str) -> String {
    let parts: Vec<&str> = sid.split('-').collect();
    if parts.len() <= 5 || !parts[0].eq_ignore_ascii_case("s") {
        return sid.to_string();
    }
    format!("{}-*-{}", parts[..4].join("-"), parts[parts.len() - 1])
}

/// Copy of `report` fit for export: user SIDs redacted throughout.
pub fn redact_report(report: &ComplianceReport) -> ComplianceReport {
    let mut redacted = report.clone();
    for entry in &mut redacted.reports {
        redact_entry(entry);
    }
    redacted
}

fn redact_entry(entry: &mut AgentPolicyReport) {
    if let Some(sid) = &entry.user_sid {
        entry.user_sid = Some(redact_sid(sid));
    }
    for child in &mut entry.child_reports {
        redact_entry(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample;

    #[test]
    fn test_redact_sid() {
        assert_eq!(redact_sid("S-1-5-21-1004336348-1177238915-682003330-1001"), "S-1-5-21-*-1001");
        assert_eq!(redact_sid("S-1-5-18"), "S-1-5-18");
    }

    #[test]
    fn test_redacted_report_hides_sids_only() {
        let report = sample();
        let redacted = redact_report(&report);
        assert_eq!(redacted.reports[2].user_sid.as_deref(), Some("S-1-5-21-*-1001"));
        assert_eq!(redacted.reports[0], report.reports[0]);
        assert!(!crate::json::render_json(&redacted).contains("1004336348"));
    }
}
