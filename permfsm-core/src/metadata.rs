//! Entity metadata resolution.
//!
//! Indexers ask the machine where the descriptive document of an entity
//! lives. The machine only answers with a URI; fetching is someone else's job.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Maps an entity identifier to the URI of its metadata document.
pub trait MetadataResolver: Send + Sync {
    fn entity_uri(&self, entity_id: u64) -> Result<String, CoreError>;
}

/// Metadata of the single entity a machine describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub entity_id: u64,
    /// Content-addressed hash of the metadata document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub base_uri: String,
}

impl EntityMetadata {
    pub fn new(entity_id: u64, content_hash: Option<String>, base_uri: impl Into<String>) -> Self {
        Self {
            entity_id,
            content_hash: content_hash.filter(|h| !h.is_empty()),
            base_uri: base_uri.into(),
        }
    }
}

impl MetadataResolver for EntityMetadata {
    /// `ipfs://<hash>` when a content hash is known, else `<base_uri>/<id>`.
    fn entity_uri(&self, entity_id: u64) -> Result<String, CoreError> {
        if entity_id != self.entity_id {
            return Err(CoreError::EntityNotFound { entity_id });
        }
        match &self.content_hash {
            Some(hash) => Ok(format!("ipfs://{}", hash)),
            None => Ok(format!(
                "{}/{}",
                self.base_uri.trim_end_matches('/'),
                entity_id
            )),
        }
    }
}
