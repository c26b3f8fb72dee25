pub mod builder;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod integrity;
pub mod reader;
pub mod schema;

pub use builder::{BuildSummary, PayloadBuilder};
pub use cache::{CachedPayload, PayloadCache};
pub use catalog::{CatalogStore, ImportSummary, RevisionRecord};
pub use error::{IntegrityError, PayloadError};
pub use integrity::{check_structure, compute_hash, verify, VerifiedPayload};
pub use reader::{CatalogReader, StoredPolicy};
