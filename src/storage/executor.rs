//! Query executor (C9): evaluates predicates against the plan C8 chose,
//! producing documents for `index_only`, `hybrid`, or `full_scan`.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinSet;

use crate::error::NyaruResult;
use crate::storage::field::{self, FieldRole};
use crate::storage::index_manager::IndexManager;
use crate::storage::planner::{Operator, Plan, Predicate, Strategy};
use crate::storage::shard_manager::ShardManager;

pub async fn execute<T>(
    plan: &Plan,
    shard_manager: &Arc<ShardManager>,
    index_manager: &Arc<IndexManager>,
) -> NyaruResult<Vec<T>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    match plan.strategy {
        Strategy::IndexOnly => execute_index_only(plan, index_manager).await,
        Strategy::Hybrid => execute_hybrid(plan, shard_manager).await,
        Strategy::FullScan => execute_full_scan(plan, shard_manager).await,
    }
}

/// Looks up every `equal(v)` predicate over the chosen index field via
/// independent, concurrently spawned lookups, cancelling the rest on the
/// first failure.
async fn execute_index_only<T>(plan: &Plan, index_manager: &Arc<IndexManager>) -> NyaruResult<Vec<T>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let Some(field) = plan.used_index.clone() else {
        return Ok(Vec::new());
    };
    let values: Vec<String> = plan
        .predicates
        .iter()
        .filter_map(|p| match (&p.field == &field, &p.op) {
            (true, Operator::Equal(v)) => Some(v.clone()),
            _ => None,
        })
        .collect();

    let mut set: JoinSet<NyaruResult<Vec<T>>> = JoinSet::new();
    for value in values {
        let index_manager = index_manager.clone();
        let field = field.clone();
        set.spawn(async move {
            let raw = index_manager.search(&field, &value).await;
            let mut decoded = Vec::with_capacity(raw.len());
            for bytes in raw {
                decoded.push(serde_json::from_slice(&bytes)?);
            }
            Ok(decoded)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(mut docs)) => results.append(&mut docs),
            Ok(Err(e)) => {
                set.abort_all();
                return Err(e);
            }
            Err(join_err) => {
                set.abort_all();
                return Err(std::io::Error::other(join_err.to_string()).into());
            }
        }
    }
    Ok(results)
}

/// Loads every non-empty shard concurrently and applies the full predicate
/// list in memory.
async fn execute_hybrid<T>(plan: &Plan, shard_manager: &Arc<ShardManager>) -> NyaruResult<Vec<T>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    scan_shards(&plan.predicates, shard_manager, true).await
}

/// Streams every shard regardless of document count, applying the
/// predicate list in memory.
async fn execute_full_scan<T>(plan: &Plan, shard_manager: &Arc<ShardManager>) -> NyaruResult<Vec<T>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    scan_shards(&plan.predicates, shard_manager, false).await
}

async fn scan_shards<T>(
    predicates: &[Predicate],
    shard_manager: &Arc<ShardManager>,
    skip_empty: bool,
) -> NyaruResult<Vec<T>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let shards = shard_manager.all_shards().await;
    let mut set: JoinSet<NyaruResult<Vec<T>>> = JoinSet::new();
    for shard in shards {
        if skip_empty && shard.metadata().await.document_count == 0 {
            continue;
        }
        let predicates = predicates.to_vec();
        set.spawn(async move {
            let docs: Vec<T> = shard.load_documents().await?;
            let mut matched = Vec::new();
            for doc in docs {
                let value = serde_json::to_value(&doc)?;
                if evaluate_all(&value, &predicates) {
                    matched.push(doc);
                }
            }
            Ok(matched)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(mut docs)) => results.append(&mut docs),
            Ok(Err(e)) => {
                set.abort_all();
                return Err(e);
            }
            Err(join_err) => {
                set.abort_all();
                return Err(std::io::Error::other(join_err.to_string()).into());
            }
        }
    }
    Ok(results)
}

pub fn evaluate_all(value: &serde_json::Value, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| evaluate(value, p))
}

fn evaluate(value: &serde_json::Value, pred: &Predicate) -> bool {
    match &pred.op {
        Operator::Exists => field::field_exists(value, &pred.field),
        Operator::NotExists => !field::field_exists(value, &pred.field),
        op => {
            let Ok(field_str) = field::extract_from_value(value, &pred.field, FieldRole::Index) else {
                return false;
            };
            match op {
                Operator::Equal(v) => values_equal(&field_str, v),
                Operator::NotEqual(v) => !values_equal(&field_str, v),
                Operator::LessThan(v) => compare(&field_str, v) == Some(Ordering::Less),
                Operator::LessOrEqual(v) => {
                    matches!(compare(&field_str, v), Some(Ordering::Less) | Some(Ordering::Equal))
                }
                Operator::GreaterThan(v) => compare(&field_str, v) == Some(Ordering::Greater),
                Operator::GreaterOrEqual(v) => {
                    matches!(compare(&field_str, v), Some(Ordering::Greater) | Some(Ordering::Equal))
                }
                Operator::Between(lo, hi) | Operator::Range(lo, hi) => {
                    in_range_inclusive(&field_str, lo, hi)
                }
                Operator::In(values) => values.iter().any(|v| values_equal(&field_str, v)),
                Operator::Contains(s) => field_str.contains(s.as_str()),
                Operator::StartsWith(s) => field_str.starts_with(s.as_str()),
                Operator::EndsWith(s) => field_str.ends_with(s.as_str()),
                Operator::Exists | Operator::NotExists => unreachable!(),
            }
        }
    }
}

fn as_f64_pair(a: &str, b: &str) -> Option<(f64, f64)> {
    Some((a.parse().ok()?, b.parse().ok()?))
}

fn values_equal(a: &str, b: &str) -> bool {
    match as_f64_pair(a, b) {
        Some((a, b)) => a == b,
        None => a == b,
    }
}

fn compare(a: &str, b: &str) -> Option<Ordering> {
    match as_f64_pair(a, b) {
        Some((a, b)) => a.partial_cmp(&b),
        None => Some(a.cmp(b)),
    }
}

fn in_range_inclusive(x: &str, lo: &str, hi: &str) -> bool {
    match (x.parse::<f64>(), lo.parse::<f64>(), hi.parse::<f64>()) {
        (Ok(x), Ok(lo), Ok(hi)) => x >= lo && x <= hi,
        _ => x >= lo && x <= hi,
    }
}
