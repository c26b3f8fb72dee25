//! Applies plans to a store and checks whether they still hold.
//!
//! A plan is a sequence of independently idempotent steps, not a
//! transaction: when a step fails, earlier steps stay applied and the
//! error is handed back to the caller.

use std::sync::Arc;

use tracing::{debug, info, warn};

use gpfleet_core::model::{ExecutionTarget, OperationScope, PolicyApplicationPlan, RegistryOperation};
use gpfleet_core::paths::{RegistryPath, RegistryRoot};

use crate::error::StoreError;
use crate::locks::ScopeLocks;
use crate::store::RegistryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub policy_name: String,
    /// Store writes performed, counting each root an operation fanned out to.
    pub writes: usize,
    pub roots: Vec<RegistryRoot>,
}

#[derive(Clone)]
pub struct PolicyApplier {
    store: Arc<dyn RegistryStore>,
    locks: Arc<ScopeLocks>,
}

impl PolicyApplier {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            locks: Arc::new(ScopeLocks::new()),
        }
    }

    pub fn with_locks(store: Arc<dyn RegistryStore>, locks: Arc<ScopeLocks>) -> Self {
        Self { store, locks }
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    pub fn apply(&self, plan: &PolicyApplicationPlan, target: &ExecutionTarget) -> Result<ApplyOutcome, StoreError> {
        let batches = self.batches(plan, target)?;
        let mut writes = 0usize;
        let mut roots = Vec::with_capacity(batches.len());

        for (root, operations) in batches {
            self.locks.with_lock(&plan.policy_name, &root, || -> Result<(), StoreError> {
                for operation in operations {
                    if let Err(err) = self.apply_one(&root, operation) {
                        warn!(
                            policy = %plan.policy_name,
                            %root,
                            key = %operation.key,
                            error = %err,
                            "operation failed; earlier operations stay applied"
                        );
                        return Err(err);
                    }
                    writes += 1;
                }
                Ok(())
            })?;
            roots.push(root);
        }

        info!(policy = %plan.policy_name, target = %target.label(), writes, "plan applied");
        Ok(ApplyOutcome {
            policy_name: plan.policy_name.clone(),
            writes,
            roots,
        })
    }

    /// Re-reads the store and reports whether every operation's end state holds.
    pub fn is_applied(&self, plan: &PolicyApplicationPlan, target: &ExecutionTarget) -> Result<bool, StoreError> {
        for (root, operations) in self.batches(plan, target)? {
            for operation in operations {
                if !self.holds(&root, operation)? {
                    debug!(policy = %plan.policy_name, %root, key = %operation.key, "operation does not hold");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Roots one operation lands in for `target`. An explicit SID on the
    /// operation always wins over what the target would fan out to.
    pub fn resolve_roots(
        &self,
        operation: &RegistryOperation,
        target: &ExecutionTarget,
    ) -> Result<Vec<RegistryRoot>, StoreError> {
        if operation.scope == OperationScope::Machine {
            return Ok(vec![RegistryRoot::Machine]);
        }
        if let Some(sid) = operation
            .target_user_sid
            .as_deref()
            .filter(|sid| !sid.trim().is_empty())
        {
            return Ok(vec![RegistryRoot::User(sid.to_string())]);
        }

        let sids = match target {
            ExecutionTarget::User { sid } => vec![sid.clone()],
            ExecutionTarget::Group { name, member_sids } => {
                if member_sids.is_empty() {
                    debug!(group = %name, "group has no members");
                }
                member_sids.clone()
            }
            ExecutionTarget::Global => self.store.user_sids()?,
            ExecutionTarget::Machine => {
                return Err(StoreError::AmbiguousScope {
                    key: operation.key.clone(),
                })
            }
        };
        Ok(sids.into_iter().map(RegistryRoot::User).collect())
    }

    /// Groups operations by root, keeping plan order within each root and
    /// first-seen order between roots. Resolves everything before any write.
    fn batches<'p>(
        &self,
        plan: &'p PolicyApplicationPlan,
        target: &ExecutionTarget,
    ) -> Result<Vec<(RegistryRoot, Vec<&'p RegistryOperation>)>, StoreError> {
        let mut batches: Vec<(RegistryRoot, Vec<&RegistryOperation>)> = Vec::new();
        for operation in &plan.operations {
            for root in self.resolve_roots(operation, target)? {
                match batches.iter_mut().find(|(known, _)| *known == root) {
                    Some((_, operations)) => operations.push(operation),
                    None => batches.push((root, vec![operation])),
                }
            }
        }
        Ok(batches)
    }

    fn apply_one(&self, root: &RegistryRoot, operation: &RegistryOperation) -> Result<(), StoreError> {
        let key = RegistryPath::parse(&operation.key);
        if operation.delete {
            let removed = if operation.value_name.is_empty() {
                self.store.delete_subtree(root, &key)?
            } else {
                self.store.delete_value(root, &key, &operation.value_name)?
            };
            debug!(%root, key = %key, value = %operation.value_name, removed, "delete");
            return Ok(());
        }

        let Some(value) = &operation.value else {
            warn!(%root, key = %key, "set operation without a value; skipping");
            return Ok(());
        };
        self.store.create_key(root, &key)?;
        self.store.set_value(root, &key, &operation.value_name, value)?;
        debug!(%root, key = %key, value = %operation.value_name, "set");
        Ok(())
    }

    fn holds(&self, root: &RegistryRoot, operation: &RegistryOperation) -> Result<bool, StoreError> {
        let key = RegistryPath::parse(&operation.key);
        if operation.delete {
            return if operation.value_name.is_empty() {
                Ok(!self.store.key_exists(root, &key)?)
            } else {
                Ok(self.store.get_value(root, &key, &operation.value_name)?.is_none())
            };
        }
        Ok(self.store.get_value(root, &key, &operation.value_name)? == operation.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRegistry;
    use gpfleet_core::model::RegistryValue;

    const KEY: &str = "Software\\Policies\\Contoso";

    fn applier_with(store: MemoryRegistry) -> (PolicyApplier, Arc<MemoryRegistry>) {
        let store = Arc::new(store);
        (PolicyApplier::new(store.clone()), store)
    }

    fn plan(operations: Vec<RegistryOperation>) -> PolicyApplicationPlan {
        PolicyApplicationPlan {
            policy_name: "Contoso".to_string(),
            operations,
        }
    }

    fn value(store: &MemoryRegistry, root: &RegistryRoot, name: &str) -> Option<RegistryValue> {
        store.get_value(root, &RegistryPath::parse(KEY), name).unwrap()
    }

    #[test]
    fn test_set_then_delete_round() {
        let (applier, store) = applier_with(MemoryRegistry::new());
        let enable = plan(vec![RegistryOperation::set(OperationScope::Machine, KEY, "Level", RegistryValue::DWord(3))]);

        assert!(!applier.is_applied(&enable, &ExecutionTarget::Machine).unwrap());
        let outcome = applier.apply(&enable, &ExecutionTarget::Machine).unwrap();
        assert_eq!(outcome.writes, 1);
        assert_eq!(value(&store, &RegistryRoot::Machine, "Level"), Some(RegistryValue::DWord(3)));
        assert!(applier.is_applied(&enable, &ExecutionTarget::Machine).unwrap());

        applier.apply(&enable, &ExecutionTarget::Machine).unwrap();
        assert!(applier.is_applied(&enable, &ExecutionTarget::Machine).unwrap());

        let disable = plan(vec![RegistryOperation::delete(OperationScope::Machine, KEY, "Level")]);
        applier.apply(&disable, &ExecutionTarget::Machine).unwrap();
        assert_eq!(value(&store, &RegistryRoot::Machine, "Level"), None);
        assert!(applier.is_applied(&disable, &ExecutionTarget::Machine).unwrap());
        assert!(store.key_exists(&RegistryRoot::Machine, &RegistryPath::parse(KEY)).unwrap());

        let clear = plan(vec![RegistryOperation::delete(OperationScope::Machine, KEY, "")]);
        applier.apply(&clear, &ExecutionTarget::Machine).unwrap();
        assert!(!store.key_exists(&RegistryRoot::Machine, &RegistryPath::parse(KEY)).unwrap());
    }

    #[test]
    fn test_user_operation_needs_a_sid() {
        let (applier, store) = applier_with(MemoryRegistry::new());
        let user_plan = plan(vec![RegistryOperation::set(OperationScope::User, KEY, "Wallpaper", RegistryValue::DWord(1))]);

        let err = applier.apply(&user_plan, &ExecutionTarget::Machine).unwrap_err();
        assert!(matches!(err, StoreError::AmbiguousScope { .. }));
        assert!(store.snapshot().user_sids().is_empty());

        let explicit = plan(vec![RegistryOperation::set(OperationScope::User, KEY, "Wallpaper", RegistryValue::DWord(1))
            .for_user(Some("S-1-5-21-5"))]);
        applier.apply(&explicit, &ExecutionTarget::Machine).unwrap();
        let root = RegistryRoot::User("S-1-5-21-5".to_string());
        assert_eq!(value(&store, &root, "Wallpaper"), Some(RegistryValue::DWord(1)));
    }

    #[test]
    fn test_group_and_global_fan_out() {
        let (applier, store) = applier_with(MemoryRegistry::with_users(["S-1-5-21-1", "S-1-5-21-2", "S-1-5-21-3"]));
        let mixed = plan(vec![
            RegistryOperation::set(OperationScope::Machine, KEY, "Machine", RegistryValue::DWord(1)),
            RegistryOperation::set(OperationScope::User, KEY, "User", RegistryValue::DWord(2)),
        ]);

        let group = ExecutionTarget::Group {
            name: "Sales".to_string(),
            member_sids: vec!["S-1-5-21-1".to_string(), "S-1-5-21-2".to_string()],
        };
        let outcome = applier.apply(&mixed, &group).unwrap();
        assert_eq!(outcome.writes, 3);
        assert_eq!(value(&store, &RegistryRoot::User("S-1-5-21-2".to_string()), "User"), Some(RegistryValue::DWord(2)));
        assert_eq!(value(&store, &RegistryRoot::User("S-1-5-21-3".to_string()), "User"), None);
        assert!(!applier.is_applied(&mixed, &ExecutionTarget::Global).unwrap());

        let outcome = applier.apply(&mixed, &ExecutionTarget::Global).unwrap();
        assert_eq!(outcome.roots.len(), 4);
        assert_eq!(value(&store, &RegistryRoot::User("S-1-5-21-3".to_string()), "User"), Some(RegistryValue::DWord(2)));
        assert!(applier.is_applied(&mixed, &ExecutionTarget::Global).unwrap());
    }

    #[test]
    fn test_failure_keeps_earlier_operations() {
        let (applier, store) = applier_with(MemoryRegistry::new());
        let partial = plan(vec![
            RegistryOperation::set(OperationScope::Machine, KEY, "First", RegistryValue::DWord(1)),
            RegistryOperation::set(OperationScope::Machine, "\\", "Broken", RegistryValue::DWord(1)),
            RegistryOperation::set(OperationScope::Machine, KEY, "Third", RegistryValue::DWord(1)),
        ]);
        let err = applier.apply(&partial, &ExecutionTarget::Machine).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert_eq!(value(&store, &RegistryRoot::Machine, "First"), Some(RegistryValue::DWord(1)));
        assert_eq!(value(&store, &RegistryRoot::Machine, "Third"), None);
    }
}
