//! Storage engine (C10): the public façade over shards, indexes, stats,
//! planner, and executor — insert, bulk-insert, fetch, update, delete,
//! count, drop, repartition, list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use crate::error::{NyaruError, NyaruResult};
use crate::storage::collection::CollectionConfig;
use crate::storage::executor;
use crate::storage::field::{self, FieldRole};
use crate::storage::index_manager::IndexManager;
use crate::storage::planner::{self, Operator, Plan, Predicate, Strategy};
use crate::storage::shard_manager::{ShardManager, DEFAULT_SHARD_ID};
use crate::storage::stats::{self, CollectionStats, GlobalStats};

struct CollectionHandles {
    config: RwLock<CollectionConfig>,
    shard_manager: Arc<ShardManager>,
    index_manager: Arc<IndexManager>,
}

/// Cheap to clone: every field is an `Arc`-backed handle, mirroring
/// `solisoft-solidb`'s `StorageEngine::clone` (clone the handles, not the
/// data).
#[derive(Clone)]
pub struct StorageEngine {
    root: PathBuf,
    collections: Arc<RwLock<HashMap<String, Arc<CollectionHandles>>>>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine").field("root", &self.root).finish()
    }
}

impl StorageEngine {
    pub async fn open(root: impl Into<PathBuf>) -> NyaruResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            collections: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn collection_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Resolves (and, if necessary, opens) a collection's handles. When a
    /// collection's directory already exists on disk but has no in-memory
    /// handle yet, `ShardManager::load_shards` is always invoked here so a
    /// reopened collection rediscovers its shards instead of appearing empty.
    async fn resolve_collection(&self, name: &str) -> NyaruResult<Arc<CollectionHandles>> {
        if let Some(handles) = self.collections.read().await.get(name) {
            return Ok(handles.clone());
        }

        let mut guard = self.collections.write().await;
        if let Some(handles) = guard.get(name) {
            return Ok(handles.clone());
        }

        let dir = self.collection_dir(name);
        let config = CollectionConfig::load(&dir)
            .await?
            .unwrap_or_else(|| CollectionConfig::new(name));

        let shard_manager = Arc::new(ShardManager::new(
            &dir,
            config.compression,
            config.file_protection,
        ));
        shard_manager.load_shards().await?;

        let index_manager = Arc::new(IndexManager::new(&dir));
        index_manager.load_all(&config.indexed_fields).await?;
        for field in &config.indexed_fields {
            index_manager.create_index(field).await;
        }

        let handles = Arc::new(CollectionHandles {
            config: RwLock::new(config),
            shard_manager,
            index_manager,
        });
        guard.insert(name.to_string(), handles.clone());
        Ok(handles)
    }

    async fn partition_id<T: Serialize>(
        doc: &T,
        config: &CollectionConfig,
    ) -> NyaruResult<String> {
        match &config.partition_key {
            Some(field_name) => field::extract(doc, field_name, FieldRole::Partition),
            None => Ok(DEFAULT_SHARD_ID.to_string()),
        }
    }

    async fn index_documents<T>(
        handles: &CollectionHandles,
        config: &CollectionConfig,
        doc: &T,
        extra_index_field: Option<&str>,
    ) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut fields: Vec<&str> = config.indexed_fields.iter().map(String::as_str).collect();
        if let Some(f) = extra_index_field {
            if !fields.contains(&f) {
                fields.push(f);
            }
        }
        for field in fields {
            handles.index_manager.upsert(field, doc).await?;
        }
        Ok(())
    }

    pub async fn insert<T>(
        &self,
        doc: T,
        collection: &str,
        index_field: Option<&str>,
    ) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = self.resolve_collection(collection).await?;
        let config = handles.config.read().await.clone();
        let partition = Self::partition_id(&doc, &config).await?;

        let shard = handles.shard_manager.get_or_create_shard(&partition).await?;
        shard.append_document(doc.clone()).await?;
        Self::index_documents(&handles, &config, &doc, index_field).await?;
        debug!(collection, partition = %partition, "inserted document");
        Ok(())
    }

    pub async fn bulk_insert<T>(
        &self,
        docs: Vec<T>,
        collection: &str,
        index_field: Option<&str>,
    ) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = self.resolve_collection(collection).await?;
        let config = handles.config.read().await.clone();

        let mut by_partition: HashMap<String, Vec<T>> = HashMap::new();
        for doc in docs {
            let partition = Self::partition_id(&doc, &config).await?;
            by_partition.entry(partition).or_default().push(doc);
        }

        for (partition, group) in by_partition {
            let shard = handles.shard_manager.get_or_create_shard(&partition).await?;
            let mut existing = shard.load_documents::<T>().await?;
            for doc in &group {
                Self::index_documents(&handles, &config, doc, index_field).await?;
            }
            existing.extend(group);
            shard.save_documents(&existing).await?;
        }
        info!(collection, "bulk insert completed");
        Ok(())
    }

    async fn stats_for(&self, collection: &str, handles: &CollectionHandles) -> CollectionStats {
        stats::collection_stats(collection, &handles.shard_manager).await
    }

    pub async fn explain(
        &self,
        collection: &str,
        predicates: Vec<Predicate>,
    ) -> NyaruResult<Plan> {
        let handles = self.resolve_collection(collection).await?;
        let available = handles.index_manager.list().await;
        let index_stats = stats::index_stats(&handles.index_manager).await;
        let shard_stats = stats::shard_stats(&handles.shard_manager).await;
        Ok(planner::plan(collection, predicates, &available, &index_stats, &shard_stats))
    }

    pub async fn query<T>(&self, collection: &str, predicates: Vec<Predicate>) -> NyaruResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = self.resolve_collection(collection).await?;
        let plan = self.explain(collection, predicates).await?;
        executor::execute(&plan, &handles.shard_manager, &handles.index_manager).await
    }

    pub async fn fetch<T>(&self, collection: &str) -> NyaruResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = match self.resolve_collection(collection).await {
            Ok(h) => h,
            Err(NyaruError::IoError(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let plan = Plan {
            collection: collection.to_string(),
            predicates: Vec::new(),
            estimated_docs: 0,
            shards_to_skip: 0,
            used_index: None,
            strategy: Strategy::FullScan,
        };
        executor::execute(&plan, &handles.shard_manager, &handles.index_manager).await
    }

    pub async fn fetch_lazy<T>(
        &self,
        collection: &str,
    ) -> Pin<Box<dyn Stream<Item = NyaruResult<T>> + Send>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let collection = collection.to_string();
        let engine = self.clone();
        Box::pin(async_stream::stream! {
            let handles = match engine.resolve_collection(&collection).await {
                Ok(h) => h,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for shard in handles.shard_manager.all_shards().await {
                let mut inner = shard.load_documents_lazy::<T>();
                while let Some(item) = inner.next().await {
                    yield item;
                }
            }
        })
    }

    pub async fn fetch_from_index<T>(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> NyaruResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.query(
            collection,
            vec![Predicate::new(field, Operator::Equal(value.to_string()))],
        )
        .await
    }

    /// First-match-within-shard semantics: the first shard (in enumeration
    /// order) containing a document matching `predicate` has that single
    /// document replaced; other matches in other shards are left untouched.
    pub async fn update<T>(
        &self,
        doc: T,
        collection: &str,
        predicate: Predicate,
        index_field: Option<&str>,
    ) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = self.resolve_collection(collection).await?;
        let config = handles.config.read().await.clone();
        for shard in handles.shard_manager.all_shards().await {
            let mut docs: Vec<T> = shard.load_documents().await?;
            let mut found = None;
            for (i, existing) in docs.iter().enumerate() {
                let value = serde_json::to_value(existing)?;
                if executor::evaluate_all(&value, std::slice::from_ref(&predicate)) {
                    found = Some(i);
                    break;
                }
            }
            if let Some(i) = found {
                docs[i] = doc.clone();
                shard.save_documents(&docs).await?;
                Self::index_documents(&handles, &config, &doc, index_field).await?;
                return Ok(());
            }
        }
        Err(NyaruError::UpdateDocumentNotFound(collection.to_string()))
    }

    pub async fn delete<T>(&self, predicate: Predicate, collection: &str) -> NyaruResult<usize>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = self.resolve_collection(collection).await?;
        let mut removed = 0;
        for shard in handles.shard_manager.all_shards().await {
            let docs: Vec<T> = shard.load_documents().await?;
            let mut survivors = Vec::with_capacity(docs.len());
            let mut removed_here = 0;
            for doc in docs {
                let value = serde_json::to_value(&doc)?;
                if executor::evaluate_all(&value, std::slice::from_ref(&predicate)) {
                    removed_here += 1;
                } else {
                    survivors.push(doc);
                }
            }
            if removed_here > 0 {
                shard.save_documents(&survivors).await?;
            }
            removed += removed_here;
        }
        Ok(removed)
    }

    pub async fn count(&self, collection: &str) -> NyaruResult<usize> {
        let handles = self.resolve_collection(collection).await?;
        Ok(self.stats_for(collection, &handles).await.document_count)
    }

    pub async fn stats(&self, collection: &str) -> NyaruResult<CollectionStats> {
        let handles = self.resolve_collection(collection).await?;
        Ok(self.stats_for(collection, &handles).await)
    }

    pub async fn global_stats(&self) -> NyaruResult<GlobalStats> {
        let mut per_collection = Vec::new();
        for name in self.list_collections().await? {
            per_collection.push(self.stats(&name).await?);
        }
        Ok(stats::global_stats(&per_collection))
    }

    pub async fn list_collections(&self) -> NyaruResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    pub async fn drop(&self, collection: &str) -> NyaruResult<()> {
        self.collections.write().await.remove(collection);
        let dir = self.collection_dir(collection);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn set_partition_key(&self, collection: &str, field: &str) -> NyaruResult<()> {
        let handles = self.resolve_collection(collection).await?;
        let mut config = handles.config.write().await;
        config.partition_key = Some(field.to_string());
        config.persist(&self.collection_dir(collection)).await
    }

    pub async fn cleanup_empty_shards(&self, collection: &str) -> NyaruResult<usize> {
        let handles = self.resolve_collection(collection).await?;
        handles.shard_manager.cleanup_empty_shards().await
    }

    /// Starts the cooperative auto-merge background loop for `collection`.
    /// Must be opted into per element type `T`, since merging requires
    /// decoding and re-encoding shard payloads and the engine's generic
    /// API does not carry a collection's element type between calls.
    pub async fn start_auto_merge<T>(
        &self,
        collection: &str,
    ) -> NyaruResult<(watch::Sender<()>, tokio::task::JoinHandle<()>)>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = self.resolve_collection(collection).await?;
        let config = handles.config.read().await.clone();
        Ok(handles
            .shard_manager
            .clone()
            .spawn_auto_merge::<T>(config.merge_threshold, config.merge_interval_secs))
    }

    /// All-or-nothing repartition: documents are grouped by `new_field`'s
    /// extracted value and written to fresh shards only after every
    /// document has been read and grouped successfully. If grouping fails,
    /// the snapshot of the original shard files is restored and the error
    /// is propagated, leaving the collection exactly as it was.
    pub async fn repartition<T>(&self, collection: &str, new_field: &str) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let handles = self.resolve_collection(collection).await?;
        let dir = self.collection_dir(collection);
        let snapshot_dir = dir.with_extension("repartition-snapshot");
        copy_dir(&dir, &snapshot_dir).await?;

        let result = self.repartition_inner::<T>(&handles, &dir, new_field).await;
        match result {
            Ok(()) => {
                tokio::fs::remove_dir_all(&snapshot_dir).await.ok();
                Ok(())
            }
            Err(e) => {
                tokio::fs::remove_dir_all(&dir).await.ok();
                copy_dir(&snapshot_dir, &dir).await?;
                tokio::fs::remove_dir_all(&snapshot_dir).await.ok();
                self.collections.write().await.remove(collection);
                Err(e)
            }
        }
    }

    async fn repartition_inner<T>(
        &self,
        handles: &CollectionHandles,
        dir: &Path,
        new_field: &str,
    ) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let mut all_docs = Vec::new();
        for shard in handles.shard_manager.all_shards().await {
            all_docs.extend(shard.load_documents::<T>().await?);
        }

        let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
        for doc in all_docs {
            let id = field::extract(&doc, new_field, FieldRole::Partition)?;
            grouped.entry(id).or_default().push(doc);
        }

        handles.shard_manager.remove_all_shards().await?;
        for (id, docs) in grouped {
            let shard = handles.shard_manager.get_or_create_shard(&id).await?;
            shard.save_documents(&docs).await?;
        }

        let collection_name = handles.config.read().await.name.clone();
        let aggregate = stats::collection_stats(&collection_name, &handles.shard_manager).await;
        let aggregate_path = dir.join(format!("{collection_name}.nyaru.meta.json"));
        let bytes = serde_json::to_vec_pretty(&aggregate)?;
        crate::storage::shard::write_atomic(&aggregate_path, &bytes).await?;

        let mut config = handles.config.write().await;
        config.partition_key = Some(new_field.to_string());
        config.persist(dir).await?;
        Ok(())
    }
}

async fn copy_dir(from: &Path, to: &Path) -> NyaruResult<()> {
    if tokio::fs::try_exists(from).await.unwrap_or(false) {
        tokio::fs::create_dir_all(to).await?;
        let mut entries = tokio::fs::read_dir(from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let dest = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                Box::pin(copy_dir(&entry.path(), &dest)).await?;
            } else {
                tokio::fs::copy(entry.path(), &dest).await?;
            }
        }
    } else {
        tokio::fs::create_dir_all(to).await?;
    }
    Ok(())
}
