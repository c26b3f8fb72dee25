//! Payload transport between master and agents, and the agent-side swap of
//! the working store.

pub mod agent;
pub mod backups;
pub mod error;
pub mod master;
pub mod merge;

pub use agent::{AgentSync, PhaseHook, SyncOptions, SyncOutcome, SyncPhase};
pub use backups::{list_backups, BackupEntry, BackupKind};
pub use error::SyncError;
pub use master::{serve_sync, MasterSync, SyncServed};
pub use merge::StageSummary;
