//! In-memory per-shard document cache.
//!
//! A shard caches the last sequence of documents it loaded, keyed by the
//! element type so a shard read as `Vec<A>` and then as `Vec<B>` does not
//! return the wrong type. Invalidated on any successful write, following
//! `DocumentCache`'s invalidate-on-write discipline.

use std::any::{Any, TypeId};
use std::sync::Arc;

use tokio::sync::RwLock;

struct CachedEntry {
    type_id: TypeId,
    documents: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
pub struct ShardDocumentCache {
    entry: RwLock<Option<CachedEntry>>,
}

impl ShardDocumentCache {
    pub fn new() -> Self {
        Self {
            entry: RwLock::new(None),
        }
    }

    pub async fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<Vec<T>>> {
        let guard = self.entry.read().await;
        let entry = guard.as_ref()?;
        if entry.type_id != TypeId::of::<T>() {
            return None;
        }
        entry.documents.clone().downcast::<Vec<T>>().ok()
    }

    pub async fn put<T: Send + Sync + 'static>(&self, documents: Vec<T>) {
        let mut guard = self.entry.write().await;
        *guard = Some(CachedEntry {
            type_id: TypeId::of::<T>(),
            documents: Arc::new(documents),
        });
    }

    pub async fn invalidate(&self) {
        let mut guard = self.entry.write().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_hits_cache() {
        let cache = ShardDocumentCache::new();
        cache.put(vec![1i32, 2, 3]).await;
        let hit = cache.get::<i32>().await;
        assert_eq!(*hit.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn mismatched_type_misses() {
        let cache = ShardDocumentCache::new();
        cache.put(vec![1i32, 2, 3]).await;
        let miss = cache.get::<String>().await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn invalidate_clears_cache() {
        let cache = ShardDocumentCache::new();
        cache.put(vec![1i32]).await;
        cache.invalidate().await;
        assert!(cache.get::<i32>().await.is_none());
    }
}
