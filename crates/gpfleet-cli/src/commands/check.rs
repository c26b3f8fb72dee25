use std::path::PathBuf;

use anyhow::{Context, Result};

use gpfleet_core::model::{OsProduct, PolicyEvaluationContext};
use policy_engine::ApplicabilityStatus;

use super::{load_config, load_policies, policy_engine};

pub struct CheckInputs {
    pub config_path: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub supported_on: Option<PathBuf>,
    pub os_version: Option<String>,
    pub product: Option<OsProduct>,
    pub json: bool,
}

pub fn execute(inputs: CheckInputs) -> Result<()> {
    let config = load_config(inputs.config_path.as_ref())?;
    let mut context = config.agent.evaluation_context()?;
    if let Some(version) = &inputs.os_version {
        context = PolicyEvaluationContext {
            os_version: version.parse().context("parse --os-version")?,
            os_product: context.os_product,
        };
    }
    if let Some(product) = inputs.product {
        context.os_product = Some(product);
    }

    let engine = policy_engine(inputs.supported_on.as_deref(), &config)?;
    let policies = load_policies(inputs.store.as_deref(), &config)?;
    let results = engine.check_batch(&policies, &context);

    if inputs.json {
        println!("{}", serde_json::to_string_pretty(&results).context("render results")?);
        return Ok(());
    }

    let applicable = results
        .iter()
        .filter(|result| result.decision.status == ApplicabilityStatus::Applicable)
        .count();
    for result in &results {
        let label = match result.decision.status {
            ApplicabilityStatus::Applicable => "applies",
            ApplicabilityStatus::NotApplicable => "skipped",
            ApplicabilityStatus::Unknown => "unknown",
            ApplicabilityStatus::PolicyNotFound => "missing",
        };
        println!("{label:<8} {}  ({})", result.name, result.decision.reason);
    }
    println!("{applicable} of {} policies apply.", results.len());
    Ok(())
}
