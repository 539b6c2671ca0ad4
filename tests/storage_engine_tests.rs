//! Storage Engine end-to-end tests
//!
//! Black-box coverage of the public `StorageEngine` API: insertion,
//! partitioning, index-only queries, range queries, update failure, and
//! B-tree persistence, driven only through the crate's public surface.

use nyarudb::storage::{Operator, Plan, Predicate, Strategy};
use nyarudb::{NyaruError, StorageEngine};
use serde_json::json;
use tempfile::TempDir;

async fn engine() -> (StorageEngine, TempDir) {
    let tmp_dir = TempDir::new().expect("failed to create temp dir");
    let engine = StorageEngine::open(tmp_dir.path())
        .await
        .expect("failed to open storage engine");
    (engine, tmp_dir)
}

#[tokio::test]
async fn single_insert_and_fetch_without_partition() {
    let (engine, tmp) = engine().await;
    engine
        .insert(json!({"id": 1, "name": "Test"}), "Users", None)
        .await
        .unwrap();

    let docs: Vec<serde_json::Value> = engine.fetch("Users").await.unwrap();
    assert_eq!(docs, vec![json!({"id": 1, "name": "Test"})]);
    assert!(tmp.path().join("Users/default.nyaru").exists());
}

#[tokio::test]
async fn partitioned_bulk_insert_creates_shards_with_expected_counts() {
    let (engine, tmp) = engine().await;
    engine.set_partition_key("Users", "c").await.unwrap();
    engine
        .bulk_insert(
            vec![
                json!({"id": 1, "c": "A"}),
                json!({"id": 2, "c": "B"}),
                json!({"id": 3, "c": "A"}),
            ],
            "Users",
            None,
        )
        .await
        .unwrap();

    assert!(tmp.path().join("Users/A.nyaru").exists());
    assert!(tmp.path().join("Users/B.nyaru").exists());

    let stats = engine.stats("Users").await.unwrap();
    let a = stats.shards.iter().find(|s| s.id == "A").unwrap();
    let b = stats.shards.iter().find(|s| s.id == "B").unwrap();
    assert_eq!(a.document_count, 2);
    assert_eq!(b.document_count, 1);
}

#[tokio::test]
async fn index_only_query_returns_exactly_the_matching_records() {
    let (engine, _tmp) = engine().await;
    for (id, name, age) in [(1, "Alice", 30), (2, "Bob", 25), (3, "Alice", 40)] {
        engine
            .insert(json!({"id": id, "name": name, "age": age}), "Users", Some("name"))
            .await
            .unwrap();
    }

    let plan: Plan = engine
        .explain("Users", vec![Predicate::new("name", Operator::Equal("Alice".into()))])
        .await
        .unwrap();
    assert_eq!(plan.strategy, Strategy::IndexOnly);

    let results: Vec<serde_json::Value> =
        engine.fetch_from_index("Users", "name", "Alice").await.unwrap();
    let mut ids: Vec<i64> = results.iter().map(|d| d["id"].as_i64().unwrap()).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn range_query_returns_documents_within_inclusive_bounds() {
    let (engine, _tmp) = engine().await;
    for (id, age) in [(1, 30), (2, 25), (3, 35), (4, 40), (5, 45)] {
        engine.insert(json!({"id": id, "age": age}), "Users", None).await.unwrap();
    }

    let docs: Vec<serde_json::Value> = engine
        .query(
            "Users",
            vec![Predicate::new("age", Operator::Between("30".into(), "40".into()))],
        )
        .await
        .unwrap();
    let mut ages: Vec<i64> = docs.iter().map(|d| d["age"].as_i64().unwrap()).collect();
    ages.sort();
    assert_eq!(ages, vec![30, 35, 40]);
}

#[tokio::test]
async fn update_on_empty_collection_fails_with_not_found() {
    let (engine, _tmp) = engine().await;
    let err = engine
        .update(
            json!({"id": 1, "name": "X"}),
            "Users",
            Predicate::new("id", Operator::Equal("1".into())),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NyaruError::UpdateDocumentNotFound(c) if c == "Users"));
}

#[tokio::test]
async fn update_replaces_the_matching_document_in_place() {
    let (engine, _tmp) = engine().await;
    engine.insert(json!({"id": 1, "name": "Old"}), "Users", None).await.unwrap();
    engine.insert(json!({"id": 2, "name": "Other"}), "Users", None).await.unwrap();

    engine
        .update(
            json!({"id": 1, "name": "New"}),
            "Users",
            Predicate::new("id", Operator::Equal("1".into())),
            None,
        )
        .await
        .unwrap();

    let docs: Vec<serde_json::Value> = engine.fetch("Users").await.unwrap();
    let updated = docs.iter().find(|d| d["id"] == 1).unwrap();
    assert_eq!(updated["name"], "New");
}

#[tokio::test]
async fn fetching_a_nonexistent_collection_is_empty_not_an_error() {
    let (engine, _tmp) = engine().await;
    let docs: Vec<serde_json::Value> = engine.fetch("Ghost").await.unwrap();
    assert!(docs.is_empty());
}

#[tokio::test]
async fn reopening_the_engine_over_an_existing_root_rediscovers_documents() {
    let tmp = TempDir::new().unwrap();
    {
        let engine = StorageEngine::open(tmp.path()).await.unwrap();
        engine.insert(json!({"id": 1}), "Users", None).await.unwrap();
        engine.insert(json!({"id": 2}), "Users", None).await.unwrap();
    }

    let engine = StorageEngine::open(tmp.path()).await.unwrap();
    let docs: Vec<serde_json::Value> = engine.fetch("Users").await.unwrap();
    assert_eq!(docs.len(), 2);
}

#[tokio::test]
async fn repartition_conserves_documents_and_regroups_by_the_new_field() {
    let (engine, tmp) = engine().await;
    engine
        .bulk_insert(
            vec![
                json!({"id": 1, "region": "east"}),
                json!({"id": 2, "region": "west"}),
                json!({"id": 3, "region": "east"}),
            ],
            "Events",
            None,
        )
        .await
        .unwrap();

    engine.repartition::<serde_json::Value>("Events", "region").await.unwrap();

    assert!(tmp.path().join("Events/east.nyaru").exists());
    assert!(tmp.path().join("Events/west.nyaru").exists());
    assert!(tmp.path().join("Events/Events.nyaru.meta.json").exists());

    let docs: Vec<serde_json::Value> = engine.fetch("Events").await.unwrap();
    assert_eq!(docs.len(), 3);
}
