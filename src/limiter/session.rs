//! Per-account session cap (Anthropic OAuth / SetupToken only): a sorted set
//! of session UUIDs with idle eviction.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::Result;

fn session_set_key(account_id: Uuid) -> String {
    format!("sessions:account:{account_id}")
}

pub struct SessionLimiter {
    cache: Arc<dyn Cache>,
    idle_timeout: Duration,
}

impl SessionLimiter {
    pub fn new(cache: Arc<dyn Cache>, idle_timeout: Duration) -> Self {
        Self { cache, idle_timeout }
    }

    /// Returns 1 (true) iff the session already exists, or the evicted count
    /// is below `max`.
    pub async fn register_session(&self, account_id: Uuid, session_uuid: &str, max: u32) -> Result<bool> {
        self.cache
            .register_session(&session_set_key(account_id), session_uuid, max, self.idle_timeout)
            .await
    }

    pub async fn active_session_count(&self, account_id: Uuid) -> Result<u64> {
        self.cache.active_session_count(&session_set_key(account_id), self.idle_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn register_returns_true_for_existing_or_headroom() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let limiter = SessionLimiter::new(cache, Duration::from_secs(1800));
        let account_id = Uuid::new_v4();

        assert!(limiter.register_session(account_id, "s1", 2).await.unwrap());
        assert!(limiter.register_session(account_id, "s1", 2).await.unwrap());
        assert!(limiter.register_session(account_id, "s2", 2).await.unwrap());
        assert_eq!(limiter.active_session_count(account_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn register_returns_false_once_full() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let limiter = SessionLimiter::new(cache, Duration::from_secs(1800));
        let account_id = Uuid::new_v4();

        assert!(limiter.register_session(account_id, "s1", 1).await.unwrap());
        assert!(!limiter.register_session(account_id, "s2", 1).await.unwrap());
    }
}
