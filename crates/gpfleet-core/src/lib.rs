pub mod config;
pub mod error;
pub mod ids;
pub mod ipc;
pub mod logging;
pub mod model;
pub mod paths;
pub mod report;
pub mod topology;

pub use config::{Config, ConfigPaths};
pub use error::FleetError;
pub use ids::{PolicyHash, Revision, SyncSessionId};
pub use ipc::{FleetRequest, FleetResponse, SyncInit};
pub use model::{
    ExecutionTarget, OperationScope, PolicyApplicationPlan, PolicyDefinition, PolicyEvaluationContext,
    PolicyScope, PolicySelection, RegistryOperation, RegistryValue, SupportedOnDefinition,
    SupportedOnExpression, ValueKind,
};
pub use paths::{RegistryPath, RegistryRoot};
pub use report::{AgentPolicyReport, ComplianceReport, ReportState};
pub use topology::{GpoTopology, RsopAppliedGpo, RsopResult};
