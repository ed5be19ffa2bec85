//! Configuration Management Module
//!
//! Engine settings and where they are loaded from.

pub mod storage;
pub mod types;

pub use storage::{config_dir, config_file, StorageError};
pub use types::EngineConfig;
