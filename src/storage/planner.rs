//! Query planner (C8): cost-based selection among full-scan, index-only,
//! and hybrid plans, plus shard pruning from per-shard field ranges.

use std::collections::HashMap;

use crate::storage::stats::{IndexStat, ShardStat};

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Equal(String),
    NotEqual(String),
    LessThan(String),
    LessOrEqual(String),
    GreaterThan(String),
    GreaterOrEqual(String),
    Between(String, String),
    Range(String, String),
    In(Vec<String>),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Exists,
    NotExists,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Operator,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Operator) -> Self {
        Self { field: field.into(), op }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FullScan,
    IndexOnly,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub collection: String,
    pub predicates: Vec<Predicate>,
    pub estimated_docs: usize,
    pub shards_to_skip: usize,
    pub used_index: Option<String>,
    pub strategy: Strategy,
}

/// Selects a plan for `predicates` over `collection`.
///
/// `estimated_docs >= total_docs / 2` (the index cost not actually beating a
/// full scan) forces `full_scan` even when an index matched a predicate.
/// The ratio is read against the whole corpus rather than against the
/// chosen cost itself — comparing a cost against itself would always be
/// true and never select anything else.
pub fn plan(
    collection: &str,
    predicates: Vec<Predicate>,
    available_indexes: &[String],
    index_stats: &HashMap<String, IndexStat>,
    shard_stats: &[ShardStat],
) -> Plan {
    let total_docs: usize = shard_stats.iter().map(|s| s.document_count).sum();

    let mut candidate: Option<(String, usize)> = None;
    for pred in &predicates {
        if !available_indexes.iter().any(|f| f == &pred.field) {
            continue;
        }
        let Some(stat) = index_stats.get(&pred.field) else {
            continue;
        };
        let cost = predicate_cost(pred, stat);
        if candidate.as_ref().map(|(_, c)| cost < *c).unwrap_or(true) {
            candidate = Some((pred.field.clone(), cost));
        }
    }

    let shards_to_skip = shard_stats
        .iter()
        .filter(|shard| !matches_any(shard, &predicates))
        .count();

    let (estimated_docs, used_index, strategy) = match candidate {
        Some((field, cost)) => {
            let strategy = if total_docs > 0 && cost * 2 >= total_docs {
                Strategy::FullScan
            } else if cost < 100 {
                Strategy::IndexOnly
            } else {
                Strategy::Hybrid
            };
            (cost, Some(field), strategy)
        }
        None => (total_docs, None, Strategy::FullScan),
    };

    Plan {
        collection: collection.to_string(),
        predicates,
        estimated_docs,
        shards_to_skip,
        used_index,
        strategy,
    }
}

fn predicate_cost(pred: &Predicate, stat: &IndexStat) -> usize {
    match &pred.op {
        Operator::Equal(v) => {
            let frequency = stat.histogram.get(v).copied().unwrap_or(1).max(1) as usize;
            stat.distinct_keys.max(1) / frequency
        }
        Operator::Between(lo, hi) | Operator::Range(lo, hi) => stat.estimate_range(lo, hi),
        _ => stat.total_entries,
    }
}

/// A shard "matches" (is kept, not pruned) unless at least one predicate has
/// a known `(min, max)` for its field on this shard and that range fails to
/// overlap. With no known ranges recorded (the common case — see DESIGN.md
/// "shard stat ranges") every shard matches.
fn matches_any(shard: &ShardStat, predicates: &[Predicate]) -> bool {
    let mut saw_known_range = false;
    for pred in predicates {
        if let Some((min, max)) = shard.field_ranges.get(&pred.field) {
            saw_known_range = true;
            if range_overlaps(min, max, &pred.op) {
                return true;
            }
        }
    }
    !saw_known_range
}

fn range_overlaps(min: &str, max: &str, op: &Operator) -> bool {
    match op {
        Operator::Equal(v) => value_in_range(min, max, v),
        Operator::Between(lo, hi) | Operator::Range(lo, hi) => {
            intervals_overlap(min, max, lo, hi)
        }
        _ => true,
    }
}

fn value_in_range(min: &str, max: &str, v: &str) -> bool {
    match (min.parse::<f64>(), max.parse::<f64>(), v.parse::<f64>()) {
        (Ok(min), Ok(max), Ok(v)) => v >= min && v <= max,
        _ => v >= min && v <= max,
    }
}

fn intervals_overlap(min: &str, max: &str, lo: &str, hi: &str) -> bool {
    match (min.parse::<f64>(), max.parse::<f64>(), lo.parse::<f64>(), hi.parse::<f64>()) {
        (Ok(min), Ok(max), Ok(lo), Ok(hi)) => min <= hi && lo <= max,
        _ => min <= hi && lo <= max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn shard(id: &str, count: usize) -> ShardStat {
        ShardStat {
            id: id.to_string(),
            document_count: count,
            field_ranges: HashMap::new(),
        }
    }

    #[test]
    fn equal_with_frequent_matches_can_still_pick_index_only() {
        let mut histogram = Map::new();
        histogram.insert("Alice".to_string(), 2u64);
        histogram.insert("Bob".to_string(), 1u64);
        let mut index_stats = Map::new();
        index_stats.insert(
            "name".to_string(),
            IndexStat { total_entries: 3, distinct_keys: 2, histogram },
        );
        let shards = vec![shard("default", 3)];

        let p = plan(
            "Users",
            vec![Predicate::new("name", Operator::Equal("Alice".to_string()))],
            &["name".to_string()],
            &index_stats,
            &shards,
        );
        assert_eq!(p.used_index.as_deref(), Some("name"));
        assert_eq!(p.strategy, Strategy::IndexOnly);
    }

    #[test]
    fn no_index_for_predicate_field_is_full_scan() {
        let shards = vec![shard("default", 10)];
        let p = plan(
            "Users",
            vec![Predicate::new("age", Operator::GreaterThan("10".to_string()))],
            &[],
            &Map::new(),
            &shards,
        );
        assert_eq!(p.strategy, Strategy::FullScan);
        assert!(p.used_index.is_none());
        assert_eq!(p.estimated_docs, 10);
    }

    #[test]
    fn high_cost_relative_to_corpus_falls_back_to_full_scan() {
        let mut index_stats = Map::new();
        index_stats.insert(
            "age".to_string(),
            IndexStat { total_entries: 1000, distinct_keys: 1000, histogram: Map::new() },
        );
        let shards = vec![shard("default", 10)];
        let p = plan(
            "Users",
            vec![Predicate::new("age", Operator::GreaterThan("10".to_string()))],
            &["age".to_string()],
            &index_stats,
            &shards,
        );
        // cost = total_entries (1000) for a non-range/non-equal operator,
        // which dwarfs the 10-document corpus, so planner prefers a scan.
        assert_eq!(p.strategy, Strategy::FullScan);
    }

    #[test]
    fn no_known_ranges_prunes_nothing() {
        let shards = vec![shard("A", 1), shard("B", 1)];
        let p = plan(
            "Users",
            vec![Predicate::new("age", Operator::Between("30".to_string(), "40".to_string()))],
            &[],
            &Map::new(),
            &shards,
        );
        assert_eq!(p.shards_to_skip, 0);
    }
}
