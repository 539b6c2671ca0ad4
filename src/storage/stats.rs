//! Stats engine (C7): per-collection and global statistics, index and
//! shard statistics feeding the query planner (C8).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::storage::index_manager::IndexManager;
use crate::storage::shard_manager::ShardManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardStat {
    pub id: String,
    pub document_count: usize,
    /// Per-field `(min, max)` range. No write path currently populates
    /// these (see DESIGN.md "shard stat ranges"), so planner pruning via
    /// ranges has nothing to match against and degrades to "no shards
    /// pruned" until a write path starts populating this map.
    pub field_ranges: HashMap<String, (String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub shard_count: usize,
    pub document_count: usize,
    pub byte_size: u64,
    pub shards: Vec<ShardStat>,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalStats {
    pub collections: usize,
    pub documents: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct IndexStat {
    pub total_entries: usize,
    pub distinct_keys: usize,
    pub histogram: HashMap<String, u64>,
}

impl IndexStat {
    /// Rough range-cost estimate used when no finer-grained histogram
    /// bucketing over `[low, high]` is available.
    pub fn estimate_range(&self, _low: &str, _high: &str) -> usize {
        (self.total_entries / 4).max(1)
    }
}

pub async fn collection_stats(name: &str, shard_manager: &ShardManager) -> CollectionStats {
    let infos = shard_manager.all_shard_info().await;
    let mut document_count = 0;
    let mut byte_size = 0u64;
    let mut shards = Vec::with_capacity(infos.len());

    for info in &infos {
        document_count += info.metadata.document_count;
        byte_size += tokio::fs::metadata(&info.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        shards.push(ShardStat {
            id: info.id.clone(),
            document_count: info.metadata.document_count,
            field_ranges: HashMap::new(),
        });
    }

    CollectionStats {
        name: name.to_string(),
        shard_count: infos.len(),
        document_count,
        byte_size,
        shards,
    }
}

pub fn global_stats(per_collection: &[CollectionStats]) -> GlobalStats {
    per_collection.iter().fold(GlobalStats::default(), |mut acc, c| {
        acc.collections += 1;
        acc.documents += c.document_count;
        acc.bytes += c.byte_size;
        acc
    })
}

pub async fn index_stats(index_manager: &IndexManager) -> HashMap<String, IndexStat> {
    let metrics = index_manager.metrics().await;
    let counts = index_manager.counts().await;
    metrics
        .into_iter()
        .map(|(field, metric)| {
            let total_entries = counts.get(&field).copied().unwrap_or(0);
            let distinct_keys = metric.value_distribution.len();
            (
                field,
                IndexStat {
                    total_entries,
                    distinct_keys,
                    histogram: metric.value_distribution,
                },
            )
        })
        .collect()
}

pub async fn shard_stats(shard_manager: &ShardManager) -> Vec<ShardStat> {
    shard_manager
        .all_shard_info()
        .await
        .into_iter()
        .map(|info| ShardStat {
            id: info.id,
            document_count: info.metadata.document_count,
            field_ranges: HashMap::new(),
        })
        .collect()
}
