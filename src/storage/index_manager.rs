//! Index manager (C6): per-collection registry of named B-tree indexes,
//! plus access metrics (count, last access, value-frequency histogram).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::NyaruResult;
use crate::storage::btree::BTreeIndex;
use crate::storage::field::{self, FieldRole};

pub const DEFAULT_MIN_DEGREE: usize = 2;

#[derive(Debug, Clone)]
pub struct IndexMetrics {
    pub access_count: u64,
    pub last_access: Option<DateTime<Utc>>,
    pub value_distribution: HashMap<String, u64>,
}

impl Default for IndexMetrics {
    fn default() -> Self {
        Self {
            access_count: 0,
            last_access: None,
            value_distribution: HashMap::new(),
        }
    }
}

impl IndexMetrics {
    fn touch(&mut self) {
        self.access_count += 1;
        self.last_access = Some(Utc::now());
    }
}

struct IndexEntry {
    tree: BTreeIndex<String>,
    metrics: IndexMetrics,
}

pub struct IndexManager {
    collection_dir: PathBuf,
    indexes: RwLock<HashMap<String, IndexEntry>>,
}

impl IndexManager {
    pub fn new(collection_dir: impl Into<PathBuf>) -> Self {
        Self {
            collection_dir: collection_dir.into(),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn index_path(&self, field: &str) -> PathBuf {
        self.collection_dir.join(format!("{field}.idx"))
    }

    pub async fn create_index(&self, field: &str) {
        self.create_index_with_degree(field, DEFAULT_MIN_DEGREE).await
    }

    pub async fn create_index_with_degree(&self, field: &str, min_degree: usize) {
        let mut guard = self.indexes.write().await;
        guard.entry(field.to_string()).or_insert_with(|| IndexEntry {
            tree: BTreeIndex::new(min_degree),
            metrics: IndexMetrics::default(),
        });
    }

    pub async fn insert(&self, field: &str, key: &str, payload: Vec<u8>) {
        let mut guard = self.indexes.write().await;
        match guard.get_mut(field) {
            Some(entry) => {
                entry.tree.insert(key.to_string(), payload);
                entry.metrics.touch();
                *entry.metrics.value_distribution.entry(key.to_string()).or_insert(0) += 1;
            }
            None => warn!(field, "insert on unknown index ignored"),
        }
    }

    pub async fn search(&self, field: &str, key: &str) -> Vec<Vec<u8>> {
        let mut guard = self.indexes.write().await;
        match guard.get_mut(field) {
            Some(entry) => {
                entry.metrics.touch();
                entry.tree.search(&key.to_string()).unwrap_or_default()
            }
            None => Vec::new(),
        }
    }

    /// Ensures `field`'s index exists, extracts it from `doc`, and inserts
    /// the encoded document as the index payload.
    ///
    /// Encoded as JSON, not bincode, for the same reason as shard payloads
    /// (`storage/shard.rs`): `T` may be `serde_json::Value`, whose
    /// `Deserialize` impl bincode cannot decode.
    pub async fn upsert<T>(&self, field: &str, doc: &T) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned,
    {
        self.create_index(field).await;
        let key = field::extract(doc, field, FieldRole::Index)?;
        let payload = serde_json::to_vec(doc)?;
        self.insert(field, &key, payload).await;
        Ok(())
    }

    pub async fn list(&self) -> Vec<String> {
        self.indexes.read().await.keys().cloned().collect()
    }

    pub async fn drop(&self, field: &str) {
        self.indexes.write().await.remove(field);
    }

    pub async fn metrics(&self) -> HashMap<String, IndexMetrics> {
        self.indexes
            .read()
            .await
            .iter()
            .map(|(field, entry)| (field.clone(), entry.metrics.clone()))
            .collect()
    }

    pub async fn counts(&self) -> HashMap<String, usize> {
        self.indexes
            .read()
            .await
            .iter()
            .map(|(field, entry)| (field.clone(), entry.tree.total_count()))
            .collect()
    }

    pub async fn persist_all(&self) -> NyaruResult<()> {
        let guard = self.indexes.read().await;
        for (field, entry) in guard.iter() {
            entry.tree.persist(&self.index_path(field)).await?;
        }
        Ok(())
    }

    pub async fn load_all(&self, fields: &[String]) -> NyaruResult<()> {
        let mut guard = self.indexes.write().await;
        for field in fields {
            let path = self.index_path(field);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            match BTreeIndex::<String>::load(&path, DEFAULT_MIN_DEGREE).await {
                Ok(tree) => {
                    guard.insert(
                        field.clone(),
                        IndexEntry {
                            tree,
                            metrics: IndexMetrics::default(),
                        },
                    );
                }
                Err(e) => warn!(field, error = %e, "failed to load persisted index"),
            }
        }
        Ok(())
    }

    pub fn collection_dir(&self) -> &Path {
        &self.collection_dir
    }
}
