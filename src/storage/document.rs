//! Shard side-car metadata: `{document_count, created_at, updated_at}`,
//! persisted as `<shard>.nyaru.meta.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata tracked for one shard. Invariant: `document_count` equals the
/// number of documents actually encoded in the shard payload after every
/// successful write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardMetadata {
    #[serde(rename = "documentCount")]
    pub document_count: usize,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl ShardMetadata {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            document_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Substituted when a side-car is missing or fails to decode — the
    /// shard remains usable and the next successful write repairs it.
    pub fn default_recovered() -> Self {
        Self::new()
    }

    pub fn touch(&mut self, document_count: usize) {
        self.document_count = document_count;
        self.updated_at = Utc::now();
    }
}

impl Default for ShardMetadata {
    fn default() -> Self {
        Self::new()
    }
}
