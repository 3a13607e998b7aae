use crate::storage::{IdentityStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;

/// Membership cache in front of an identity store
///
/// The set only grows, so a cached "known" answer can never go stale and
/// repeat pings from the same device skip the database entirely.
pub struct CachedIdentityStore {
    /// Underlying storage implementation
    inner: Arc<dyn IdentityStore>,
    /// Identifiers known to be present (Moka cache)
    known: Cache<String, ()>,
}

impl CachedIdentityStore {
    pub fn new(inner: Arc<dyn IdentityStore>, max_cache_entries: u64) -> Self {
        let known = Cache::builder().max_capacity(max_cache_entries).build();

        Self { inner, known }
    }

    async fn remember(&self, uid: &str) {
        self.known.insert(uid.to_string(), ()).await;
    }
}

#[async_trait]
impl IdentityStore for CachedIdentityStore {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn insert_if_absent(&self, uid: &str, first_seen: i64) -> StorageResult<bool> {
        if self.known.contains_key(uid) {
            return Ok(false);
        }

        let inserted = self.inner.insert_if_absent(uid, first_seen).await?;
        self.remember(uid).await;
        Ok(inserted)
    }

    async fn count(&self) -> StorageResult<u64> {
        self.inner.count().await
    }
}
