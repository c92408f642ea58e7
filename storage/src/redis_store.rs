//! Redis-backed reconnect-memory store.
//!
//! Any conformant keyed-persistent-KV-with-expiry implementation satisfies
//! spec.md's "Reconnect memory" contract; Redis is the one named in spec.md
//! §6's configuration schema (`redis_url`), so it's the concrete backend
//! here. The key space is namespaced under `gantry:reconnect:`.

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::{ReconnectEntry, ReconnectStore, StorageError};

fn key_for(worker_name: &str) -> String {
    format!("gantry:reconnect:{worker_name}")
}

pub struct RedisReconnectStore {
    client: redis::Client,
}

impl RedisReconnectStore {
    pub fn new(redis_url: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(RedisReconnectStore { client })
    }
}

#[async_trait]
impl ReconnectStore for RedisReconnectStore {
    async fn get(&self, worker_name: &str) -> Result<Option<ReconnectEntry>, StorageError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let raw: Option<String> = conn
            .get(key_for(worker_name))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        worker_name: &str,
        difficulty: f64,
        ttl_s: u64,
    ) -> Result<(), StorageError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let entry = ReconnectEntry {
            difficulty,
            updated_at: crate::now_secs(),
        };
        let raw = serde_json::to_string(&entry)?;
        let _: () = conn
            .set_ex(key_for(worker_name), raw, ttl_s as usize)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
