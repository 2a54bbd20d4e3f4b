//! `RedisBackend` — the production `Backend` implementation, over
//! `redis::aio::ConnectionManager` (spec §1, §6: "the engine requires a
//! queue+KV backend meeting §6"; the Redis server itself is an external
//! collaborator, specified only as the transport this talks to).

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, instrument};

use crate::{Backend, BackendError};

/// Queue operations map to Redis list commands (`LPUSH`/`BRPOP`); cache
/// operations map to `SET`/`GET`/`DEL`/`EXISTS`. `ConnectionManager` gives us
/// automatic reconnection without the engine needing its own pool.
#[derive(Clone)]
pub struct RedisBackend {
    conn: redis::aio::ConnectionManager,
}

impl RedisBackend {
    /// Connect to `redis_url` (e.g. `redis://127.0.0.1:6379`).
    #[instrument(skip(redis_url))]
    pub async fn connect(redis_url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, payload).await?;
        debug!(queue, "pushed payload");
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout_ms: u64) -> Result<Option<Vec<u8>>, BackendError> {
        let mut conn = self.conn.clone();
        // BRPOP's timeout granularity is seconds; round up so a sub-second
        // caller timeout still blocks at least that long rather than zero.
        let timeout_secs = ((timeout_ms as f64) / 1000.0).ceil() as f64;
        let result: Option<(String, Vec<u8>)> =
            conn.brpop(queue, timeout_secs).await?;
        Ok(result.map(|(_key, payload)| payload))
    }

    async fn cache_set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_ms: Option<u64>,
    ) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        match ttl_ms {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.max(1) / 1000 + 1).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn cache_get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn cache_delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn cache_exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }
}
