//! JSON file rule store
//!
//! Reads a JSON array of rule documents on every call. Edits to the file are
//! picked up by the next query without any reload step.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::store::{RuleStore, StoreError};
use super::types::RuleDocument;

/// Get the default rules file path (~/.sshgate/rules.json)
pub fn default_rules_file() -> Result<PathBuf, StoreError> {
    dirs::home_dir()
        .map(|home| home.join(".sshgate").join("rules.json"))
        .ok_or_else(|| StoreError::Unavailable("Cannot determine home directory".to_string()))
}

pub struct JsonFileRuleStore {
    path: PathBuf,
}

impl JsonFileRuleStore {
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self {
            path: default_rules_file()?,
        })
    }

    /// Create store with custom path (for testing)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RuleStore for JsonFileRuleStore {
    async fn fetch_all(&self) -> Result<Vec<RuleDocument>, StoreError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Rules file {:?} not found, no documents", self.path);
                return Ok(Vec::new());
            }
            Err(e) => {
                warn!("Failed to read rules file {:?}: {}", self.path, e);
                return Err(e.into());
            }
        };

        let documents: Vec<RuleDocument> = serde_json::from_str(&contents)
            .inspect_err(|e| warn!("Rules file {:?} is malformed: {}", self.path, e))?;

        debug!(
            "Loaded {} rule documents from {:?}",
            documents.len(),
            self.path
        );
        Ok(documents)
    }
}
