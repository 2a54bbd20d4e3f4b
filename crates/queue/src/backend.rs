//! The `Backend` contract — durable FIFO queues + TTL key-value cache
//! (spec §4.1, §6).

use async_trait::async_trait;

use crate::BackendError;

/// Two logical namespaces behind one transport: named FIFO queues (bytes in,
/// bytes out, multi-producer multi-consumer safe) and a TTL cache
/// (last-writer-wins).
///
/// The engine never interprets payloads beyond serialize/deserialize — both
/// namespaces move opaque bytes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Append `payload` to the tail of `queue`.
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BackendError>;

    /// Block up to `timeout_ms` for the head element of `queue`. Returns
    /// `None` on timeout. Safe across concurrent consumers: exactly one
    /// consumer receives a given payload.
    async fn pop(&self, queue: &str, timeout_ms: u64) -> Result<Option<Vec<u8>>, BackendError>;

    /// Write `value` under `key`, optionally expiring after `ttl_ms`.
    async fn cache_set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_ms: Option<u64>,
    ) -> Result<(), BackendError>;

    /// Read the value stored under `key`, if any (and not expired).
    async fn cache_get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Remove `key`. Returns whether a value was actually present.
    async fn cache_delete(&self, key: &str) -> Result<bool, BackendError>;

    /// Whether `key` currently holds a value.
    async fn cache_exists(&self, key: &str) -> Result<bool, BackendError>;
}
