//! Rule documents and the store they are fetched from

pub mod file_store;
pub mod store;
pub mod types;

pub use file_store::{default_rules_file, JsonFileRuleStore};
pub use store::{select_governing, GoverningPolicy, MemoryRuleStore, RuleStore, StoreError};
pub use types::{DestinationDescriptor, KeyMaterial, MaterialError, RuleDocument, SourceIdentity};
