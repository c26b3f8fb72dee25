use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use enforcer::{FileRegistry, InspectRequest, Inspector, PolicyApplier};
use gpfleet_core::ids::Revision;
use gpfleet_core::ipc::{resolve_socket_path, send_request, FleetRequest, FleetResponse};
use gpfleet_core::model::{
    ExecutionTarget, PolicyApplicationPlan, PolicyDefinition, PolicyEvaluationContext, PolicyScope,
    PolicySelection,
};
use payload::CatalogReader;
use policy_engine::{ApplicabilityStatus, PlanTarget, PolicyEngine};
use reporting::human::human_summary;
use reporting::json::render_json;
use reporting::redact::redact_report;

use super::{find_policy, load_config, load_policies, policy_engine, read_json};

pub struct PolicyInputs {
    pub config_path: Option<PathBuf>,
    pub policy: String,
    pub enabled: bool,
    pub selection: Option<PathBuf>,
    pub sid: Option<String>,
    pub store: Option<PathBuf>,
    pub supported_on: Option<PathBuf>,
}

pub struct InspectInputs {
    pub config_path: Option<PathBuf>,
    pub policies: Vec<String>,
    pub store: Option<PathBuf>,
    pub expected_enabled: bool,
    pub user: Option<String>,
    pub json: bool,
    pub redact: bool,
    pub submit: bool,
}

/// `None` leaves the target to the policy scope and `--sid`.
pub fn execution_target(
    user: Option<String>,
    group: Option<String>,
    members: Vec<String>,
    global: bool,
) -> Option<ExecutionTarget> {
    if global {
        return Some(ExecutionTarget::Global);
    }
    if let Some(name) = group {
        return Some(ExecutionTarget::Group {
            name,
            member_sids: members,
        });
    }
    user.map(|sid| ExecutionTarget::User { sid })
}

fn plan_target(policy: &PolicyDefinition, sid: Option<&str>) -> PlanTarget {
    match (policy.scope, sid) {
        (PolicyScope::User, sid) => PlanTarget::user(sid),
        (PolicyScope::Both, Some(sid)) => PlanTarget::user(Some(sid)),
        _ => PlanTarget::machine(),
    }
}

fn build(
    engine: &PolicyEngine,
    inputs: &PolicyInputs,
    policy: &PolicyDefinition,
) -> Result<PolicyApplicationPlan> {
    let selection: Option<PolicySelection> = match &inputs.selection {
        Some(path) => Some(read_json(path)?),
        None => None,
    };
    let target = plan_target(policy, inputs.sid.as_deref());
    Ok(engine.plan(policy, inputs.enabled, selection.as_ref(), &target))
}

pub fn plan(inputs: PolicyInputs) -> Result<()> {
    let config = load_config(inputs.config_path.as_ref())?;
    let policies = load_policies(inputs.store.as_deref(), &config)?;
    let policy = find_policy(&policies, &inputs.policy)?;
    let engine = policy_engine(inputs.supported_on.as_deref(), &config)?;
    let plan = build(&engine, &inputs, policy)?;
    println!("{}", serde_json::to_string_pretty(&plan).context("render plan")?);
    Ok(())
}

pub fn apply(inputs: PolicyInputs, target: Option<ExecutionTarget>) -> Result<()> {
    let config = load_config(inputs.config_path.as_ref())?;
    let policies = load_policies(inputs.store.as_deref(), &config)?;
    let policy = find_policy(&policies, &inputs.policy)?;

    let engine = policy_engine(inputs.supported_on.as_deref(), &config)?;
    ensure_applicable(&engine, policy, &config.agent.evaluation_context()?)?;

    let plan = build(&engine, &inputs, policy)?;
    let target = target.unwrap_or_else(|| match &inputs.sid {
        Some(sid) => ExecutionTarget::User { sid: sid.clone() },
        None => ExecutionTarget::Machine,
    });

    let registry = FileRegistry::open(&config.agent.registry_path)
        .with_context(|| format!("open registry {}", config.agent.registry_path.display()))?;
    let applier = PolicyApplier::new(Arc::new(registry));
    let outcome = applier
        .apply(&plan, &target)
        .with_context(|| format!("apply {} for {}", policy.name, target.label()))?;
    println!(
        "{} applied for {}: {} writes across {} roots.",
        outcome.policy_name,
        target.label(),
        outcome.writes,
        outcome.roots.len()
    );
    Ok(())
}

/// Refuses policies that do not apply here; `Unknown` only warns.
fn ensure_applicable(
    engine: &PolicyEngine,
    policy: &PolicyDefinition,
    context: &PolicyEvaluationContext,
) -> Result<()> {
    let decision = engine.check(policy, context);
    match decision.status {
        ApplicabilityStatus::Applicable => Ok(()),
        ApplicabilityStatus::NotApplicable | ApplicabilityStatus::PolicyNotFound => Err(anyhow::anyhow!(
            "{} does not apply to this host: {}",
            policy.name,
            decision.reason
        )),
        ApplicabilityStatus::Unknown => {
            warn!(policy = %policy.name, reason = %decision.reason, "applicability unknown; applying anyway");
            Ok(())
        }
    }
}

pub fn inspect(inputs: InspectInputs) -> Result<()> {
    let config = load_config(inputs.config_path.as_ref())?;
    let store_path = inputs.store.clone().unwrap_or_else(|| config.agent.working_store.clone());
    let policies = load_policies(Some(&store_path), &config)?;
    let revision = CatalogReader::open(&store_path)?
        .revision()?
        .unwrap_or(Revision::INITIAL);

    let selected: Vec<&PolicyDefinition> = if inputs.policies.is_empty() {
        policies.iter().collect()
    } else {
        inputs
            .policies
            .iter()
            .map(|name| find_policy(&policies, name))
            .collect::<Result<_>>()?
    };

    let registry = FileRegistry::open(&config.agent.registry_path)
        .with_context(|| format!("open registry {}", config.agent.registry_path.display()))?;
    let inspector = Inspector::new(Arc::new(registry));

    let mut reports = Vec::with_capacity(selected.len());
    for policy in selected {
        if policy.scope == PolicyScope::User && inputs.user.is_none() {
            warn!(policy = %policy.name, "user policy skipped; pass --user to inspect it");
            continue;
        }
        let request = InspectRequest {
            user_sid: inputs.user.as_deref(),
            ..InspectRequest::new(policy, inputs.expected_enabled)
        };
        reports.push(inspector.inspect(&request).with_context(|| format!("inspect {}", policy.name))?);
    }

    let report = reporting::build_report(&config.agent.agent_id, revision, reports);
    let report = if inputs.redact { redact_report(&report) } else { report };

    if inputs.json {
        println!("{}", render_json(&report));
    } else {
        println!("{}", human_summary(&report));
    }

    if inputs.submit {
        let socket = resolve_socket_path();
        match send_request(&socket, &FleetRequest::SubmitReport(report))? {
            FleetResponse::ReportAccepted(accepted) => {
                println!("Report stored by master as {}.", accepted.stored_as.display());
            }
            FleetResponse::Error(error) => return Err(anyhow::anyhow!(error.message)),
            other => return Err(anyhow::anyhow!("unexpected response: {other:?}")),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpfleet_core::config::{Config, ConfigPaths};
    use tempfile::TempDir;

    fn contoso_policy() -> PolicyDefinition {
        PolicyDefinition {
            name: "Banner".to_string(),
            display_name: None,
            category: None,
            scope: PolicyScope::Machine,
            registry_key: "Software\\Policies\\Contoso\\Banner".to_string(),
            value_name: "Enabled".to_string(),
            enabled_value: Some(1),
            disabled_value: None,
            list_keys: Vec::new(),
            supported_on: Some("SUPPORTED_Contoso".to_string()),
            elements: Vec::new(),
        }
    }

    fn write_catalog(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("supported-on.json");
        std::fs::write(
            &path,
            r#"[{"name":"SUPPORTED_Contoso","expression":{"kind":"reference","ref":"SUPPORTED_Windows7"}}]"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_apply_gate_consults_supported_on_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = write_catalog(&dir);
        let mut config = Config::with_paths(&ConfigPaths::under(dir.path()));
        let context = config.agent.evaluation_context().unwrap();
        let policy = contoso_policy();

        let builtin_only = policy_engine(None, &config).unwrap();
        let err = ensure_applicable(&builtin_only, &policy, &context).unwrap_err();
        assert!(err.to_string().contains("does not apply"));

        let from_flag = policy_engine(Some(&catalog), &config).unwrap();
        ensure_applicable(&from_flag, &policy, &context).unwrap();

        config.agent.supported_on_catalog = Some(catalog);
        let from_config = policy_engine(None, &config).unwrap();
        ensure_applicable(&from_config, &policy, &context).unwrap();
    }

    #[test]
    fn test_execution_target_precedence() {
        assert_eq!(execution_target(None, None, Vec::new(), false), None);
        assert_eq!(
            execution_target(Some("S-1-5-21-1".to_string()), None, Vec::new(), false),
            Some(ExecutionTarget::User {
                sid: "S-1-5-21-1".to_string()
            })
        );
        assert_eq!(
            execution_target(None, Some("Ops".to_string()), vec!["S-1".to_string()], false),
            Some(ExecutionTarget::Group {
                name: "Ops".to_string(),
                member_sids: vec!["S-1".to_string()]
            })
        );
        assert_eq!(execution_target(None, None, Vec::new(), true), Some(ExecutionTarget::Global));
    }
}
