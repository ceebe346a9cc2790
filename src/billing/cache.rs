//! Cache-aside reads for subscription windows, with jittered TTL to avoid a
//! thundering-herd stampede on expiry.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;
use crate::error::Result;
use crate::types::UserSubscription;

fn subscription_cache_key(user_id: uuid::Uuid, group_id: uuid::Uuid) -> String {
    format!("subscription:{user_id}:{group_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSubscription {
    subscription: UserSubscription,
}

pub struct SubscriptionCache {
    cache: Arc<dyn Cache>,
    base_ttl: Duration,
    jitter: Duration,
}

impl SubscriptionCache {
    pub fn new(cache: Arc<dyn Cache>, base_ttl_seconds: i64, jitter_seconds: i64) -> Self {
        Self {
            cache,
            base_ttl: Duration::from_secs(base_ttl_seconds.max(0) as u64),
            jitter: Duration::from_secs(jitter_seconds.max(0) as u64),
        }
    }

    fn jittered_ttl(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base_ttl;
        }
        let jitter_secs = rand::thread_rng().gen_range(0..=self.jitter.as_secs());
        self.base_ttl + Duration::from_secs(jitter_secs)
    }

    pub async fn get(&self, user_id: uuid::Uuid, group_id: uuid::Uuid) -> Result<Option<UserSubscription>> {
        let key = subscription_cache_key(user_id, group_id);
        let Some(raw) = self.cache.get(&key).await? else { return Ok(None) };
        Ok(serde_json::from_str::<CachedSubscription>(&raw).ok().map(|c| c.subscription))
    }

    pub async fn put(&self, subscription: &UserSubscription) -> Result<()> {
        let key = subscription_cache_key(subscription.user_id, subscription.group_id);
        let encoded = serde_json::to_string(&CachedSubscription { subscription: subscription.clone() })
            .unwrap_or_default();
        self.cache.set(&key, &encoded, self.jittered_ttl()).await
    }

    /// On DB failure after a cache write, the entry is invalidated rather
    /// than left to serve a possibly-inconsistent value.
    pub async fn invalidate(&self, user_id: uuid::Uuid, group_id: uuid::Uuid) -> Result<()> {
        self.cache.del(&subscription_cache_key(user_id, group_id)).await
    }

    /// True when the cached copy's optimistic version trails the freshly
    /// read DB row's version — the background reconciler's trigger.
    pub fn is_stale(cached: &UserSubscription, db: &UserSubscription) -> bool {
        cached.version < db.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::types::SubscriptionStatus;
    use chrono::Utc;

    fn subscription() -> UserSubscription {
        UserSubscription {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            group_id: uuid::Uuid::new_v4(),
            starts_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(30),
            status: SubscriptionStatus::Active,
            daily_window_start: None,
            weekly_window_start: None,
            monthly_window_start: None,
            daily_usage_usd: 0.0,
            weekly_usage_usd: 0.0,
            monthly_usage_usd: 0.0,
            version: 1,
        }
    }

    #[tokio::test]
    async fn round_trips_through_cache() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let subscription_cache = SubscriptionCache::new(cache, 300, 30);
        let sub = subscription();
        subscription_cache.put(&sub).await.unwrap();
        let fetched = subscription_cache.get(sub.user_id, sub.group_id).await.unwrap().unwrap();
        assert_eq!(fetched.id, sub.id);
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let subscription_cache = SubscriptionCache::new(cache, 300, 30);
        assert!(subscription_cache.get(uuid::Uuid::new_v4(), uuid::Uuid::new_v4()).await.unwrap().is_none());
    }

    #[test]
    fn staleness_compares_versions() {
        let mut cached = subscription();
        let mut db = subscription();
        db.version = 2;
        assert!(SubscriptionCache::is_stale(&cached, &db));
        cached.version = 2;
        assert!(!SubscriptionCache::is_stale(&cached, &db));
    }
}
