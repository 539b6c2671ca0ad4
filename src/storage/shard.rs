//! Shard (C3): one on-disk file holding the ordered documents of one
//! collection partition, plus a metadata side-car.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use futures::Stream;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::NyaruResult;
use crate::storage::codec::{self, CompressionMethod};
use crate::storage::collection::FileProtection;
use crate::storage::document::ShardMetadata;
use crate::storage::document_cache::ShardDocumentCache;

pub const SHARD_EXTENSION: &str = "nyaru";
const META_SUFFIX: &str = ".meta.json";

pub fn shard_path(collection_dir: &Path, id: &str) -> PathBuf {
    collection_dir.join(format!("{id}.{SHARD_EXTENSION}"))
}

pub fn meta_path(shard_path: &Path) -> PathBuf {
    let mut s = shard_path.as_os_str().to_owned();
    s.push(META_SUFFIX);
    PathBuf::from(s)
}

/// Write-to-temp then rename: the all-or-nothing primitive every mutating
/// write in this crate goes through, so a crash mid-write never leaves a
/// shard, side-car, or index file partially written.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> NyaruResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = {
        let mut s = path.as_os_str().to_owned();
        s.push(".tmp");
        PathBuf::from(s)
    };
    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Best-effort application of the opaque file-protection tag. Beyond the
/// portable Unix permission bits, this is a no-op.
fn apply_file_protection(path: &Path, protection: FileProtection) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = match protection {
            FileProtection::None => 0o644,
            FileProtection::Complete
            | FileProtection::CompleteUnlessOpen
            | FileProtection::CompleteUntilFirstUserAuthentication => 0o600,
        };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, protection);
    }
    Ok(())
}

pub struct Shard {
    pub id: String,
    pub path: PathBuf,
    meta_path: PathBuf,
    compression: CompressionMethod,
    file_protection: FileProtection,
    metadata: RwLock<ShardMetadata>,
    cache: ShardDocumentCache,
}

impl Shard {
    /// Construct a handle without touching disk; callers create the file
    /// lazily on first write via [`Shard::save_documents`] or
    /// [`Shard::append_document`].
    pub fn new(
        collection_dir: &Path,
        id: impl Into<String>,
        compression: CompressionMethod,
        file_protection: FileProtection,
    ) -> Self {
        let id = id.into();
        let path = shard_path(collection_dir, &id);
        let meta_path = meta_path(&path);
        Self {
            id,
            path,
            meta_path,
            compression,
            file_protection,
            metadata: RwLock::new(ShardMetadata::new()),
            cache: ShardDocumentCache::new(),
        }
    }

    /// Load the side-car, recovering with a default on missing/corrupt
    /// metadata rather than surfacing an error — the shard stays usable and
    /// the next successful write repairs it.
    pub async fn load_metadata(&self) {
        let loaded = match tokio::fs::read(&self.meta_path).await {
            Ok(bytes) => match serde_json::from_slice::<ShardMetadata>(&bytes) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(shard = %self.id, error = %e, "corrupt shard side-car, substituting default");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(shard = %self.id, error = %e, "unreadable shard side-car, substituting default");
                None
            }
        };
        let mut guard = self.metadata.write().await;
        *guard = loaded.unwrap_or_else(ShardMetadata::default_recovered);
    }

    pub async fn metadata(&self) -> ShardMetadata {
        self.metadata.read().await.clone()
    }

    async fn persist_metadata(&self, document_count: usize) -> NyaruResult<()> {
        let mut guard = self.metadata.write().await;
        guard.touch(document_count);
        let bytes = serde_json::to_vec_pretty(&*guard)?;
        write_atomic(&self.meta_path, &bytes).await
    }

    /// Metadata-only write, independent of the payload.
    pub async fn update_metadata(&self, document_count: usize) -> NyaruResult<()> {
        self.persist_metadata(document_count).await
    }

    pub async fn load_documents<T>(&self) -> NyaruResult<Vec<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        if let Some(cached) = self.cache.get::<T>().await {
            return Ok((*cached).clone());
        }

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.cache.put::<T>(Vec::new()).await;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let decompressed = codec::decompress(&bytes, self.compression)?;
        // A zero-byte payload only happens for a shard written before this
        // crate started always encoding the empty array; every shard written
        // by `save_documents` below decodes as a (possibly empty) JSON array.
        let docs: Vec<T> = if decompressed.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(&decompressed)?
        };
        self.cache.put::<T>(docs.clone()).await;
        Ok(docs)
    }

    /// Encode, compress, and atomically rewrite the whole shard. This is the
    /// crate's single-shard atomicity unit: either the full new payload (and
    /// refreshed metadata) lands, or the previous state is left untouched.
    ///
    /// Payloads are JSON, not bincode: bincode is not self-describing, and
    /// this crate's documents are caller-supplied `T` that may itself be a
    /// `serde_json::Value` (whose `Deserialize` impl calls `deserialize_any`,
    /// which bincode rejects). JSON also lets an empty shard round-trip as an
    /// encoded empty array (`[]`) rather than a zero-byte file.
    pub async fn save_documents<T>(&self, docs: &[T]) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let encoded = serde_json::to_vec(docs)?;
        let compressed = codec::compress(&encoded, self.compression)?;
        write_atomic(&self.path, &compressed).await?;
        apply_file_protection(&self.path, self.file_protection)?;
        self.persist_metadata(docs.len()).await?;
        self.cache.put::<T>(docs.to_vec()).await;
        Ok(())
    }

    pub async fn append_document<T>(&self, doc: T) -> NyaruResult<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let mut docs = self.load_documents::<T>().await?;
        docs.push(doc);
        self.save_documents(&docs).await
    }

    /// Yields documents one at a time, suspending between items so a
    /// cancelled consumer stops without loading the rest of the shard into
    /// memory beyond what was already decoded.
    pub fn load_documents_lazy<T>(
        self: std::sync::Arc<Self>,
    ) -> Pin<Box<dyn Stream<Item = NyaruResult<T>> + Send>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Box::pin(async_stream::stream! {
            let docs = match self.load_documents::<T>().await {
                Ok(docs) => docs,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for doc in docs {
                tokio::task::yield_now().await;
                yield Ok(doc);
            }
        })
    }

    pub async fn byte_size(&self) -> u64 {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub async fn remove(&self) -> NyaruResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) | Err(_) => {}
        }
        match tokio::fs::remove_file(&self.meta_path).await {
            Ok(()) | Err(_) => {}
        }
        Ok(())
    }
}
