use clap::{Parser, Subcommand};
use nyarudb::storage::{Operator, Predicate};
use nyarudb::StorageEngine;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "nyarudb-cli")]
#[command(about = "nyarudb - an embedded, shard-partitioned document database", long_about = None)]
struct Args {
    /// Data directory holding one subdirectory per collection
    #[arg(long, default_value = "./data")]
    data_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert a single JSON document
    Insert {
        collection: String,
        /// Document body as a JSON object
        document: String,
        /// Additional field to secondary-index beyond the collection's configured ones
        #[arg(long)]
        index: Option<String>,
    },
    /// Fetch every document in a collection
    Fetch { collection: String },
    /// Replace the first document whose field equals a value
    Update {
        collection: String,
        field: String,
        value: String,
        document: String,
        #[arg(long)]
        index: Option<String>,
    },
    /// Equality query against a secondary index
    Query {
        collection: String,
        field: String,
        value: String,
    },
    /// Print collection statistics
    Stats { collection: String },
    /// List known collections
    List,
    /// Set (or replace) a collection's partition key
    SetPartitionKey { collection: String, field: String },
    /// Regroup a collection's documents by a new partition field
    Repartition { collection: String, field: String },
    /// Remove shards left with zero documents
    CleanupEmptyShards { collection: String },
    /// Delete a collection and all its data
    Drop { collection: String },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nyarudb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = StorageEngine::open(&args.data_dir).await?;

    match args.command {
        Command::Insert { collection, document, index } => {
            let doc: Value = serde_json::from_str(&document)?;
            engine.insert(doc, &collection, index.as_deref()).await?;
            tracing::info!(collection, "document inserted");
        }
        Command::Fetch { collection } => {
            let docs: Vec<Value> = engine.fetch(&collection).await?;
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }
        Command::Update { collection, field, value, document, index } => {
            let doc: Value = serde_json::from_str(&document)?;
            engine
                .update(
                    doc,
                    &collection,
                    Predicate::new(field, Operator::Equal(value)),
                    index.as_deref(),
                )
                .await?;
            tracing::info!(collection, "document updated");
        }
        Command::Query { collection, field, value } => {
            let docs: Vec<Value> = engine
                .query(&collection, vec![Predicate::new(field, Operator::Equal(value))])
                .await?;
            println!("{}", serde_json::to_string_pretty(&docs)?);
        }
        Command::Stats { collection } => {
            let stats = engine.stats(&collection).await?;
            println!("{stats:#?}");
        }
        Command::List => {
            for name in engine.list_collections().await? {
                println!("{name}");
            }
        }
        Command::SetPartitionKey { collection, field } => {
            engine.set_partition_key(&collection, &field).await?;
        }
        Command::Repartition { collection, field } => {
            engine.repartition::<Value>(&collection, &field).await?;
        }
        Command::CleanupEmptyShards { collection } => {
            let removed = engine.cleanup_empty_shards(&collection).await?;
            tracing::info!(collection, removed, "cleanup complete");
        }
        Command::Drop { collection } => {
            engine.drop(&collection).await?;
        }
    }

    Ok(())
}
