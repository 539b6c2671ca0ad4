//! Shard manager (C4): per-collection registry of shards, creation,
//! lookup, loading from disk, and background small-shard auto-merge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::{NyaruError, NyaruResult};
use crate::storage::codec::CompressionMethod;
use crate::storage::collection::FileProtection;
use crate::storage::document::ShardMetadata;
use crate::storage::shard::{Shard, SHARD_EXTENSION};

pub const DEFAULT_SHARD_ID: &str = "default";

/// `(id, path, metadata)`, used by stats/planner and by `all_shard_info`.
pub struct ShardInfo {
    pub id: String,
    pub path: PathBuf,
    pub metadata: ShardMetadata,
}

pub struct ShardManager {
    collection_dir: PathBuf,
    compression: CompressionMethod,
    file_protection: FileProtection,
    shards: RwLock<HashMap<String, Arc<Shard>>>,
}

impl ShardManager {
    pub fn new(
        collection_dir: impl Into<PathBuf>,
        compression: CompressionMethod,
        file_protection: FileProtection,
    ) -> Self {
        Self {
            collection_dir: collection_dir.into(),
            compression,
            file_protection,
            shards: RwLock::new(HashMap::new()),
        }
    }

    pub fn collection_dir(&self) -> &Path {
        &self.collection_dir
    }

    fn build_shard(&self, id: &str) -> Shard {
        Shard::new(&self.collection_dir, id, self.compression, self.file_protection)
    }

    pub async fn create_shard(&self, id: &str) -> NyaruResult<Arc<Shard>> {
        let mut guard = self.shards.write().await;
        if guard.contains_key(id) {
            return Err(NyaruError::ShardAlreadyExists(id.to_string()));
        }
        let shard = Arc::new(self.build_shard(id));
        shard.save_documents::<serde_json::Value>(&[]).await?;
        guard.insert(id.to_string(), shard.clone());
        Ok(shard)
    }

    pub async fn get_shard(&self, id: &str) -> NyaruResult<Arc<Shard>> {
        let guard = self.shards.read().await;
        guard
            .get(id)
            .cloned()
            .ok_or_else(|| NyaruError::ShardNotFound(id.to_string()))
    }

    pub async fn get_or_create_shard(&self, id: &str) -> NyaruResult<Arc<Shard>> {
        if let Ok(shard) = self.get_shard(id).await {
            return Ok(shard);
        }
        let mut guard = self.shards.write().await;
        if let Some(shard) = guard.get(id) {
            return Ok(shard.clone());
        }
        let shard = Arc::new(self.build_shard(id));
        shard.load_metadata().await;
        guard.insert(id.to_string(), shard.clone());
        Ok(shard)
    }

    pub async fn all_shards(&self) -> Vec<Arc<Shard>> {
        self.shards.read().await.values().cloned().collect()
    }

    pub async fn all_shard_info(&self) -> Vec<ShardInfo> {
        let guard = self.shards.read().await;
        let mut infos = Vec::with_capacity(guard.len());
        for shard in guard.values() {
            infos.push(ShardInfo {
                id: shard.id.clone(),
                path: shard.path.clone(),
                metadata: shard.metadata().await,
            });
        }
        infos
    }

    /// Populate the registry from the directory. Scans for the actual
    /// on-disk extension (`.nyaru`) so a manager constructed over an
    /// existing collection directory rediscovers every shard already
    /// written there, rather than only knowing about shards created in the
    /// current process.
    pub async fn load_shards(&self) -> NyaruResult<()> {
        let mut entries = match tokio::fs::read_dir(&self.collection_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            // A shard file is `<id>.nyaru`; its side-car `<id>.nyaru.meta.json`
            // is skipped here and picked up by `Shard::load_metadata`.
            if let Some(id) = name.strip_suffix(&format!(".{SHARD_EXTENSION}")) {
                ids.push(id.to_string());
            }
        }

        let mut guard = self.shards.write().await;
        for id in ids {
            if guard.contains_key(&id) {
                continue;
            }
            let shard = Arc::new(self.build_shard(&id));
            shard.load_metadata().await;
            guard.insert(id, shard);
        }
        Ok(())
    }

    pub async fn remove_all_shards(&self) -> NyaruResult<()> {
        let mut guard = self.shards.write().await;
        for shard in guard.values() {
            shard.remove().await?;
        }
        guard.clear();
        Ok(())
    }

    pub async fn cleanup_empty_shards(&self) -> NyaruResult<usize> {
        let mut guard = self.shards.write().await;
        let mut removed = 0;
        let mut keep = HashMap::new();
        for (id, shard) in guard.drain() {
            if shard.metadata().await.document_count == 0 {
                shard.remove().await?;
                removed += 1;
            } else {
                keep.insert(id, shard);
            }
        }
        *guard = keep;
        Ok(removed)
    }

    /// Best-effort consolidation of shards with `document_count` below
    /// `threshold`. Generic over `T` so the same routine works for any
    /// collection's element type; errors on individual secondaries are
    /// logged and that shard is skipped rather than aborting the sweep.
    pub async fn merge_small_shards<T>(&self, threshold: usize) -> NyaruResult<usize>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let mut candidates: Vec<(String, Arc<Shard>, ShardMetadata)> = Vec::new();
        for shard in self.all_shards().await {
            let meta = shard.metadata().await;
            if meta.document_count < threshold {
                candidates.push((shard.id.clone(), shard.clone(), meta));
            }
        }
        if candidates.len() < 2 {
            return Ok(0);
        }
        candidates.sort_by_key(|(_, _, meta)| meta.created_at);

        let (primary_id, primary, _) = candidates.remove(0);
        let mut merged_count = 0;

        for (secondary_id, secondary, _) in candidates {
            match merge_one(&primary, &secondary).await {
                Ok(()) => {
                    self.shards.write().await.remove(&secondary_id);
                    merged_count += 1;
                    info!(primary = %primary_id, secondary = %secondary_id, "merged small shard");
                }
                Err(e) => {
                    warn!(secondary = %secondary_id, error = %e, "auto-merge skipped shard");
                }
            }
        }
        Ok(merged_count)
    }

    /// Spawns the cooperative background merge loop. Returns a sender whose
    /// drop (or explicit `send(())`) stops the loop at its next wake-up.
    pub fn spawn_auto_merge<T>(
        self: Arc<Self>,
        threshold: usize,
        interval_secs: u64,
    ) -> (watch::Sender<()>, tokio::task::JoinHandle<()>)
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let (tx, mut rx) = watch::channel(());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.merge_small_shards::<T>(threshold).await {
                            Ok(0) => debug!("auto-merge sweep found nothing to merge"),
                            Ok(n) => info!(merged = n, "auto-merge sweep completed"),
                            Err(e) => warn!(error = %e, "auto-merge sweep failed"),
                        }
                    }
                    _ = rx.changed() => {
                        debug!("auto-merge loop cancelled");
                        break;
                    }
                }
            }
        });
        (tx, handle)
    }
}

async fn merge_one<T>(primary: &Shard, secondary: &Shard) -> NyaruResult<()>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let secondary_docs = secondary.load_documents::<T>().await?;
    secondary.remove().await?;
    let mut primary_docs = primary.load_documents::<T>().await?;
    primary_docs.extend(secondary_docs);
    primary.save_documents(&primary_docs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Doc {
        id: u32,
    }

    #[tokio::test]
    async fn create_shard_then_get_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShardManager::new(dir.path(), CompressionMethod::Gzip, FileProtection::None);
        mgr.create_shard("A").await.unwrap();
        assert!(mgr.get_shard("A").await.is_ok());
    }

    #[tokio::test]
    async fn create_shard_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShardManager::new(dir.path(), CompressionMethod::Gzip, FileProtection::None);
        mgr.create_shard("A").await.unwrap();
        let err = mgr.create_shard("A").await.unwrap_err();
        assert!(matches!(err, NyaruError::ShardAlreadyExists(id) if id == "A"));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShardManager::new(dir.path(), CompressionMethod::Gzip, FileProtection::None);
        let first = mgr.get_or_create_shard("A").await.unwrap();
        let second = mgr.get_or_create_shard("A").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn load_shards_rediscovers_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mgr = ShardManager::new(dir.path(), CompressionMethod::Gzip, FileProtection::None);
            let shard = mgr.get_or_create_shard("A").await.unwrap();
            shard.save_documents(&[Doc { id: 1 }]).await.unwrap();
        }
        // Fresh manager over the same directory: must rediscover "A".
        let mgr = ShardManager::new(dir.path(), CompressionMethod::Gzip, FileProtection::None);
        mgr.load_shards().await.unwrap();
        let shard = mgr.get_shard("A").await.unwrap();
        assert_eq!(shard.metadata().await.document_count, 1);
    }

    #[tokio::test]
    async fn merge_small_shards_conserves_documents_and_reduces_count() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShardManager::new(dir.path(), CompressionMethod::None, FileProtection::None);
        let a = mgr.get_or_create_shard("A").await.unwrap();
        a.save_documents(&[Doc { id: 1 }]).await.unwrap();
        let b = mgr.get_or_create_shard("B").await.unwrap();
        b.save_documents(&[Doc { id: 2 }, Doc { id: 3 }]).await.unwrap();

        let merged = mgr.merge_small_shards::<Doc>(100).await.unwrap();
        assert_eq!(merged, 1);
        assert_eq!(mgr.all_shards().await.len(), 1);
        let remaining = mgr.all_shards().await.remove(0);
        let docs: Vec<Doc> = remaining.load_documents().await.unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[tokio::test]
    async fn cleanup_empty_shards_removes_only_empty_ones() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = ShardManager::new(dir.path(), CompressionMethod::None, FileProtection::None);
        mgr.create_shard("empty").await.unwrap();
        let full = mgr.get_or_create_shard("full").await.unwrap();
        full.save_documents(&[Doc { id: 1 }]).await.unwrap();

        let removed = mgr.cleanup_empty_shards().await.unwrap();
        assert_eq!(removed, 1);
        assert!(mgr.get_shard("empty").await.is_err());
        assert!(mgr.get_shard("full").await.is_ok());
    }
}
