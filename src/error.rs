use thiserror::Error;

use crate::storage::codec::CompressionMethod;

/// Error surface exposed to callers of the storage engine.
///
/// This mirrors the named error kinds a caller can branch on: invariant
/// violations (missing keys, duplicate/absent shards, update misses),
/// codec failures, and I/O failures. Metadata corruption is recovered
/// locally (see `storage::shard`) and never reaches this type.
#[derive(Error, Debug)]
pub enum NyaruError {
    #[error("document is missing required fields or is not an object: {0}")]
    InvalidDocument(String),

    #[error("partition key '{0}' missing from document")]
    PartitionKeyMissing(String),

    #[error("index key '{0}' missing from document")]
    IndexKeyMissing(String),

    #[error("shard '{0}' already exists")]
    ShardAlreadyExists(String),

    #[error("shard '{0}' not found")]
    ShardNotFound(String),

    #[error("failed to create shard manager for collection '{0}': {1}")]
    ShardManagerCreationFailed(String, String),

    #[error("no document in collection '{0}' matched the update predicate")]
    UpdateDocumentNotFound(String),

    #[error("codec error ({method:?}): {source}")]
    CodecError {
        method: CompressionMethod,
        source: String,
    },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),
}

pub type NyaruResult<T> = Result<T, NyaruError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = NyaruError::PartitionKeyMissing("category".to_string());
        assert_eq!(err.to_string(), "partition key 'category' missing from document");

        let err = NyaruError::IndexKeyMissing("name".to_string());
        assert_eq!(err.to_string(), "index key 'name' missing from document");

        let err = NyaruError::ShardAlreadyExists("A".to_string());
        assert_eq!(err.to_string(), "shard 'A' already exists");

        let err = NyaruError::ShardNotFound("B".to_string());
        assert_eq!(err.to_string(), "shard 'B' not found");

        let err = NyaruError::UpdateDocumentNotFound("Users".to_string());
        assert!(err.to_string().contains("Users"));
    }

    #[test]
    fn test_result_alias() {
        let ok: NyaruResult<i32> = Ok(1);
        assert_eq!(ok.unwrap(), 1);
        let err: NyaruResult<i32> = Err(NyaruError::CollectionNotFound("x".into()));
        assert!(err.is_err());
    }
}
