//! Applicability resolution for `SupportedOn` expression trees.
//!
//! The resolver never fails: anything it cannot decide comes back as
//! `Unknown` with a reason, so one bad definition cannot abort a batch.

use std::sync::Arc;

use tracing::{debug, warn};

use gpfleet_core::model::{PolicyEvaluationContext, SupportedOnExpression};

use crate::catalog::{catalog_key, SupportedOnCatalog};
use crate::decision::{ApplicabilityDecision, ApplicabilityStatus};
use crate::rules::platform;

/// Deepest expression nesting (references included) the resolver follows.
pub const MAX_DEPTH: usize = 32;

#[derive(Clone)]
pub struct ApplicabilityResolver {
    catalog: Arc<dyn SupportedOnCatalog>,
}

impl ApplicabilityResolver {
    pub fn new(catalog: Arc<dyn SupportedOnCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolves a top-level supported-on name.
    pub fn resolve(&self, name: &str, context: &PolicyEvaluationContext) -> ApplicabilityDecision {
        match self.catalog.find(name) {
            Some(definition) => {
                let mut trail = vec![catalog_key(&definition.name)];
                self.evaluate(&definition.expression, context, &mut trail, 0)
            }
            None => platform::evaluate(name, context).unwrap_or_else(|| {
                ApplicabilityDecision::not_found(format!("supported-on definition {name} not found"))
            }),
        }
    }

    /// Evaluates a free-standing expression against the catalog.
    pub fn evaluate_expression(
        &self,
        expression: &SupportedOnExpression,
        context: &PolicyEvaluationContext,
    ) -> ApplicabilityDecision {
        self.evaluate(expression, context, &mut Vec::new(), 0)
    }

    fn evaluate(
        &self,
        expression: &SupportedOnExpression,
        context: &PolicyEvaluationContext,
        trail: &mut Vec<String>,
        depth: usize,
    ) -> ApplicabilityDecision {
        if depth > MAX_DEPTH {
            return ApplicabilityDecision::unknown("expression nests too deeply");
        }

        match expression {
            SupportedOnExpression::Reference { reference } => {
                self.resolve_reference(reference, context, trail, depth)
            }
            SupportedOnExpression::Range {
                reference,
                min_version_index,
                max_version_index,
            } => evaluate_range(reference, *min_version_index, *max_version_index, context),
            SupportedOnExpression::And { items } => {
                for item in items {
                    let decision = self.evaluate(item, context, trail, depth + 1);
                    if !decision.is_applicable() {
                        return decision;
                    }
                }
                ApplicabilityDecision::applicable(format!("all {} conditions hold", items.len()))
            }
            SupportedOnExpression::Or { items } => {
                let mut indeterminate = 0usize;
                for item in items {
                    let decision = self.evaluate(item, context, trail, depth + 1);
                    match decision.status {
                        ApplicabilityStatus::Applicable => return decision,
                        ApplicabilityStatus::Unknown => indeterminate += 1,
                        ApplicabilityStatus::NotApplicable | ApplicabilityStatus::PolicyNotFound => {}
                    }
                }
                if indeterminate > 0 {
                    ApplicabilityDecision::unknown(format!(
                        "no alternative applies; {indeterminate} of {} indeterminate",
                        items.len()
                    ))
                } else {
                    ApplicabilityDecision::not_applicable(format!(
                        "none of {} alternatives applies",
                        items.len()
                    ))
                }
            }
            SupportedOnExpression::Malformed => {
                warn!("malformed supported-on expression node");
                ApplicabilityDecision::unknown("malformed expression node")
            }
        }
    }

    fn resolve_reference(
        &self,
        reference: &str,
        context: &PolicyEvaluationContext,
        trail: &mut Vec<String>,
        depth: usize,
    ) -> ApplicabilityDecision {
        if let Some(decision) = platform::evaluate(reference, context) {
            return decision;
        }

        let key = catalog_key(reference);
        if trail.contains(&key) {
            warn!(reference, "cyclic supported-on reference");
            return ApplicabilityDecision::unknown(format!("cyclic reference: {reference}"));
        }

        match self.catalog.find(reference) {
            Some(definition) => {
                debug!(reference, "following supported-on reference");
                trail.push(key);
                let decision = self.evaluate(&definition.expression, context, trail, depth + 1);
                trail.pop();
                decision
            }
            None => ApplicabilityDecision::unknown(format!("unresolved reference: {reference}")),
        }
    }
}

fn evaluate_range(
    reference: &str,
    min: Option<u32>,
    max: Option<u32>,
    context: &PolicyEvaluationContext,
) -> ApplicabilityDecision {
    let Some(build) = context.os_version.build else {
        return ApplicabilityDecision::unknown(format!("{reference}: host build is unknown"));
    };
    if let Some(min) = min {
        if build < min {
            return ApplicabilityDecision::not_applicable(format!(
                "{reference}: build {build} is below {min}"
            ));
        }
    }
    if let Some(max) = max {
        if build > max {
            return ApplicabilityDecision::not_applicable(format!(
                "{reference}: build {build} is above {max}"
            ));
        }
    }
    ApplicabilityDecision::applicable(format!("{reference}: build {build} in range"))
}
