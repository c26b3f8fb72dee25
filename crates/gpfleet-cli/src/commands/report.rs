use std::path::Path;

use anyhow::Result;

use gpfleet_core::report::ComplianceReport;
use reporting::human::human_summary;
use reporting::json::render_json;
use reporting::redact::redact_report;

use super::read_json;

pub fn execute(input: &Path, json: bool, redact: bool) -> Result<()> {
    let report: ComplianceReport = read_json(input)?;
    let report = if redact { redact_report(&report) } else { report };

    if json {
        println!("{}", render_json(&report));
    } else {
        println!("{}", human_summary(&report));
    }
    Ok(())
}
