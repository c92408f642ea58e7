//! Gantry Storage: the reconnect-memory KV store (spec.md §3, §4.2, §4.4).
//!
//! On disconnect, the stratum server writes `worker_name -> current_diff`
//! with a TTL; on authorize it reads the value back and applies it before
//! the first `mining.notify`. The in-process cache is write-through — every
//! write lands in the backing store before the call returns, so a restart
//! never loses a value a session believes was persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

pub mod redis_store;

pub use redis_store::RedisReconnectStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend I/O error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Difficulty persisted for a worker, with the wall-clock second it was
/// written.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReconnectEntry {
    pub difficulty: f64,
    pub updated_at: u64,
}

/// `worker_name -> (difficulty, updated_at)`, keyed-TTL persistent store
/// (spec.md §3 "Reconnect Memory").
#[async_trait]
pub trait ReconnectStore: Send + Sync {
    async fn get(&self, worker_name: &str) -> Result<Option<ReconnectEntry>, StorageError>;
    async fn set(
        &self,
        worker_name: &str,
        difficulty: f64,
        ttl_s: u64,
    ) -> Result<(), StorageError>;
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// In-memory implementation: sufficient for a single-process standalone
/// deployment or as the layer under a Redis-backed store in tests. Entries
/// past their TTL are treated as absent but are lazily reaped on `get`
/// rather than on a background timer.
pub struct MemoryReconnectStore {
    entries: RwLock<HashMap<String, (ReconnectEntry, u64)>>, // (entry, expires_at)
}

impl MemoryReconnectStore {
    pub fn new() -> Self {
        MemoryReconnectStore {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryReconnectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReconnectStore for MemoryReconnectStore {
    async fn get(&self, worker_name: &str) -> Result<Option<ReconnectEntry>, StorageError> {
        let map = self.entries.read().await;
        match map.get(worker_name) {
            Some((entry, expires_at)) if *expires_at > now_secs() => Ok(Some(*entry)),
            _ => Ok(None),
        }
    }

    async fn set(
        &self,
        worker_name: &str,
        difficulty: f64,
        ttl_s: u64,
    ) -> Result<(), StorageError> {
        let now = now_secs();
        let entry = ReconnectEntry {
            difficulty,
            updated_at: now,
        };
        self.entries
            .write()
            .await
            .insert(worker_name.to_string(), (entry, now + ttl_s));
        Ok(())
    }
}

/// Write-through cache over a backing `ReconnectStore`: writes land in the
/// in-process cache and the backend before returning; reads are served from
/// the cache, falling back to the backend on a cache miss (spec.md §5
/// "Reconnect memory: external KV store; in-process cache is write-through").
pub struct CachedReconnectStore<B: ReconnectStore> {
    cache: Arc<MemoryReconnectStore>,
    backend: B,
}

impl<B: ReconnectStore> CachedReconnectStore<B> {
    pub fn new(backend: B) -> Self {
        CachedReconnectStore {
            cache: Arc::new(MemoryReconnectStore::new()),
            backend,
        }
    }
}

#[async_trait]
impl<B: ReconnectStore> ReconnectStore for CachedReconnectStore<B> {
    async fn get(&self, worker_name: &str) -> Result<Option<ReconnectEntry>, StorageError> {
        if let Some(entry) = self.cache.get(worker_name).await? {
            return Ok(Some(entry));
        }
        self.backend.get(worker_name).await
    }

    async fn set(
        &self,
        worker_name: &str,
        difficulty: f64,
        ttl_s: u64,
    ) -> Result<(), StorageError> {
        self.backend.set(worker_name, difficulty, ttl_s).await?;
        self.cache.set(worker_name, difficulty, ttl_s).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_worker_returns_none() {
        let store = MemoryReconnectStore::new();
        assert!(store.get("rig01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn round_trips_a_written_difficulty() {
        let store = MemoryReconnectStore::new();
        store.set("rig01", 512.0, 86_400).await.unwrap();
        let entry = store.get("rig01").await.unwrap().unwrap();
        assert_eq!(entry.difficulty, 512.0);
    }

    #[tokio::test]
    async fn expired_entry_is_treated_as_absent() {
        let store = MemoryReconnectStore::new();
        store.set("rig01", 512.0, 0).await.unwrap();
        // ttl_s=0 means expires_at == now; a moment later it's expired.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(store.get("rig01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cached_store_reads_from_cache_after_backend_write() {
        let store = CachedReconnectStore::new(MemoryReconnectStore::new());
        store.set("rig01", 256.0, 86_400).await.unwrap();
        let entry = store.get("rig01").await.unwrap().unwrap();
        assert_eq!(entry.difficulty, 256.0);
    }
}
