//! Collection configuration: partition key, indexed fields, compression,
//! file-protection tag. Persisted alongside the collection directory so a
//! reopened database recovers configuration without the caller restating it.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::NyaruResult;
use crate::storage::codec::CompressionMethod;

/// Opaque OS file-protection attribute, carried through to the filesystem
/// without further interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileProtection {
    #[default]
    None,
    Complete,
    CompleteUnlessOpen,
    CompleteUntilFirstUserAuthentication,
}

/// Per-collection configuration, persisted as `<collection>/.config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// Field whose extracted value determines a document's shard id.
    /// `None` routes every document to the shard named `"default"`.
    pub partition_key: Option<String>,
    /// Fields maintained as B-tree secondary indexes.
    #[serde(default)]
    pub indexed_fields: Vec<String>,
    #[serde(default)]
    pub compression: CompressionMethod,
    #[serde(default)]
    pub file_protection: FileProtection,
    /// Auto-merge: shards below this document count are merge candidates.
    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: usize,
    /// Auto-merge sweep interval, in seconds.
    #[serde(default = "default_merge_interval_secs")]
    pub merge_interval_secs: u64,
}

fn default_merge_threshold() -> usize {
    100
}

fn default_merge_interval_secs() -> u64 {
    60
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: None,
            indexed_fields: Vec::new(),
            compression: CompressionMethod::default(),
            file_protection: FileProtection::default(),
            merge_threshold: default_merge_threshold(),
            merge_interval_secs: default_merge_interval_secs(),
        }
    }

    pub fn with_partition_key(mut self, field: impl Into<String>) -> Self {
        self.partition_key = Some(field.into());
        self
    }

    pub fn with_indexed_field(mut self, field: impl Into<String>) -> Self {
        self.indexed_fields.push(field.into());
        self
    }

    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    const CONFIG_FILE: &'static str = ".config.json";

    pub async fn load(collection_dir: &Path) -> NyaruResult<Option<Self>> {
        let path = collection_dir.join(Self::CONFIG_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn persist(&self, collection_dir: &Path) -> NyaruResult<()> {
        tokio::fs::create_dir_all(collection_dir).await?;
        let path = collection_dir.join(Self::CONFIG_FILE);
        let bytes = serde_json::to_vec_pretty(self)?;
        crate::storage::shard::write_atomic(&path, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_partition_and_index_fields() {
        let cfg = CollectionConfig::new("Users")
            .with_partition_key("category")
            .with_indexed_field("name")
            .with_compression(CompressionMethod::Lz4);
        assert_eq!(cfg.partition_key.as_deref(), Some("category"));
        assert_eq!(cfg.indexed_fields, vec!["name".to_string()]);
        assert_eq!(cfg.compression, CompressionMethod::Lz4);
    }

    #[tokio::test]
    async fn persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let collection_dir = dir.path().join("Users");
        let cfg = CollectionConfig::new("Users").with_partition_key("category");
        cfg.persist(&collection_dir).await.unwrap();

        let loaded = CollectionConfig::load(&collection_dir).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Users");
        assert_eq!(loaded.partition_key.as_deref(), Some("category"));
    }

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CollectionConfig::load(dir.path()).await.unwrap();
        assert!(loaded.is_none());
    }
}
