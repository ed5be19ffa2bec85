//! Rule Store Gateway
//!
//! The store is an external dependency; this module only defines the query
//! surface the engine needs plus an in-memory backend. Nothing here caches:
//! every call reflects the store's current contents.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::RuleDocument;

/// Store gateway errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Rule store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Expected exactly one rule document, found {0}")]
    Ambiguous(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which rule document governs a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GoverningPolicy {
    /// Exactly one document must exist
    #[default]
    Single,
    /// Whatever the store returns first
    FirstFound,
    /// The document with this `_id`
    ById { id: String },
}

/// Pick the governing document out of a full listing.
pub fn select_governing(
    mut documents: Vec<RuleDocument>,
    policy: &GoverningPolicy,
) -> Result<RuleDocument, StoreError> {
    match policy {
        GoverningPolicy::Single => match documents.len() {
            0 => Err(StoreError::NotFound("no rule document in store".to_string())),
            1 => Ok(documents.remove(0)),
            n => Err(StoreError::Ambiguous(n)),
        },
        GoverningPolicy::FirstFound => {
            if documents.is_empty() {
                Err(StoreError::NotFound("no rule document in store".to_string()))
            } else {
                Ok(documents.remove(0))
            }
        }
        GoverningPolicy::ById { id } => documents
            .into_iter()
            .find(|doc| &doc.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("rule document {} not found", id))),
    }
}

/// Rule store interface
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Fetch every rule document
    async fn fetch_all(&self) -> Result<Vec<RuleDocument>, StoreError>;

    /// Fetch the document governing a session.
    ///
    /// Backends that can query natively should override this; the default
    /// lists everything and applies [`select_governing`].
    async fn fetch_governing(&self, policy: &GoverningPolicy) -> Result<RuleDocument, StoreError> {
        let documents = self.fetch_all().await?;
        let document = select_governing(documents, policy)?;
        debug!("Governing rule document: {}", document.id);
        Ok(document)
    }
}

/// In-memory rule store
#[derive(Default)]
pub struct MemoryRuleStore {
    documents: RwLock<Vec<RuleDocument>>,
}

impl MemoryRuleStore {
    pub fn new(documents: Vec<RuleDocument>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    /// Insert a document, replacing any with the same id
    pub fn upsert(&self, document: RuleDocument) {
        let mut documents = self.documents.write();
        match documents.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => documents.push(document),
        }
    }

    pub fn remove(&self, id: &str) -> Option<RuleDocument> {
        let mut documents = self.documents.write();
        let index = documents.iter().position(|d| d.id == id)?;
        Some(documents.remove(index))
    }

    pub fn replace_all(&self, documents: Vec<RuleDocument>) {
        *self.documents.write() = documents;
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn fetch_all(&self) -> Result<Vec<RuleDocument>, StoreError> {
        Ok(self.documents.read().clone())
    }
}
