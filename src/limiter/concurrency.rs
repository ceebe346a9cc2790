//! Per-account and per-user concurrency slots.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::Result;

pub fn account_slot_prefix(account_id: Uuid) -> String {
    format!("slot:account:{account_id}:")
}

pub fn user_slot_prefix(user_id: Uuid) -> String {
    format!("slot:user:{user_id}:")
}

/// One concurrency resource class (account or user), counted independently.
pub struct ConcurrencySlots {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl ConcurrencySlots {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// `acquire(prefix, max, requestID)`: `max=0` always returns false,
    /// treating an unconfigured limit as "no capacity" rather than unlimited.
    pub async fn acquire(&self, prefix: &str, max: u32, request_id: &str) -> Result<bool> {
        if max == 0 {
            return Ok(false);
        }
        self.cache.acquire_slot(prefix, request_id, max, self.ttl).await
    }

    pub async fn release(&self, prefix: &str, request_id: &str) -> Result<()> {
        self.cache.release_slot(prefix, request_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn acquire_release_restores_capacity() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let slots = ConcurrencySlots::new(cache, Duration::from_secs(600));
        let account_id = Uuid::new_v4();
        let prefix = account_slot_prefix(account_id);

        assert!(slots.acquire(&prefix, 1, "req-1").await.unwrap());
        assert!(!slots.acquire(&prefix, 1, "req-2").await.unwrap());
        slots.release(&prefix, "req-1").await.unwrap();
        assert!(slots.acquire(&prefix, 1, "req-2").await.unwrap());
    }

    #[tokio::test]
    async fn second_release_is_a_no_op() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let slots = ConcurrencySlots::new(cache, Duration::from_secs(600));
        let prefix = account_slot_prefix(Uuid::new_v4());
        assert!(slots.acquire(&prefix, 1, "req-1").await.unwrap());
        slots.release(&prefix, "req-1").await.unwrap();
        // idempotent: releasing again must not error or affect future acquires
        slots.release(&prefix, "req-1").await.unwrap();
        assert!(slots.acquire(&prefix, 1, "req-2").await.unwrap());
    }

    #[tokio::test]
    async fn max_zero_always_fails() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let slots = ConcurrencySlots::new(cache, Duration::from_secs(600));
        let prefix = account_slot_prefix(Uuid::new_v4());
        assert!(!slots.acquire(&prefix, 0, "req-1").await.unwrap());
    }
}
