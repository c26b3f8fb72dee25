pub mod applier;
pub mod error;
pub mod file;
pub mod hive;
pub mod inspector;
pub mod locks;
pub mod store;

pub use applier::{ApplyOutcome, PolicyApplier};
pub use error::StoreError;
pub use file::FileRegistry;
pub use inspector::{InspectRequest, Inspector};
pub use locks::ScopeLocks;
pub use store::{MemoryRegistry, RegistryStore};
