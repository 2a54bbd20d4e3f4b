//! `InMemoryBackend` — an in-process `Backend` for tests and for the `dev`
//! CLI path when no Redis URL is configured.
//!
//! Grounded in the teacher's testing philosophy of swapping a "mock pool"
//! fixture in for the real transport (`engine/src/executor_tests.rs`)
//! rather than standing up a live dependency for unit tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{Backend, BackendError};

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, std::collections::VecDeque<Vec<u8>>>,
    cache: HashMap<String, CacheEntry>,
}

/// A `Mutex`-guarded in-process `Backend`. Multiple consumers on the same
/// queue name are served FIFO; `pop` polls with a short interval until
/// `timeout_ms` elapses rather than relying on OS-level blocking primitives.
pub struct InMemoryBackend {
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state.queues.entry(queue.to_string()).or_default().push_back(payload);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout_ms: u64) -> Result<Option<Vec<u8>>, BackendError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(q) = state.queues.get_mut(queue) {
                    if let Some(payload) = q.pop_front() {
                        return Ok(Some(payload));
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn cache_set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_ms: Option<u64>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state.cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl_ms.map(|ttl| Instant::now() + Duration::from_millis(ttl)),
            },
        );
        Ok(())
    }

    async fn cache_get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.cache.get(key) {
            if let Some(expires_at) = entry.expires_at {
                if Instant::now() >= expires_at {
                    state.cache.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn cache_delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut state = self.state.lock().await;
        Ok(state.cache.remove(key).is_some())
    }

    async fn cache_exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.cache_get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let backend = InMemoryBackend::new();
        backend.push("q", b"first".to_vec()).await.unwrap();
        backend.push("q", b"second".to_vec()).await.unwrap();

        assert_eq!(backend.pop("q", 50).await.unwrap(), Some(b"first".to_vec()));
        assert_eq!(backend.pop("q", 50).await.unwrap(), Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.pop("empty", 20).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cache_ttl_expires() {
        let backend = InMemoryBackend::new();
        backend.cache_set("k", b"v".to_vec(), Some(10)).await.unwrap();
        assert!(backend.cache_exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!backend.cache_exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn cache_without_ttl_persists() {
        let backend = InMemoryBackend::new();
        backend.cache_set("k", b"v".to_vec(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.cache_get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn delete_reports_whether_a_value_was_present() {
        let backend = InMemoryBackend::new();
        assert!(!backend.cache_delete("missing").await.unwrap());
        backend.cache_set("k", b"v".to_vec(), None).await.unwrap();
        assert!(backend.cache_delete("k").await.unwrap());
    }
}
