//! Key-value cache layer: session stickiness, concurrency slots, window-cost
//! cache, rate-limit markers.
//!
//! A `Cache` trait keeps the rest of the dispatch core independent of which
//! backend executes the scripts in `scripts.rs`, so a plain in-memory CAS
//! loop satisfies the same contract for tests and single-process
//! deployments where server-side scripting isn't available.

pub mod scripts;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{GatewayError, Result};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;

    /// `acquire(prefix, request_id, max, ttl)`: SET NX semantics over the
    /// `{prefix}{request_id}` key, gated on a count of existing keys under
    /// `{prefix}*`.
    async fn acquire_slot(&self, prefix: &str, request_id: &str, max: u32, ttl: Duration) -> Result<bool>;
    async fn release_slot(&self, prefix: &str, request_id: &str) -> Result<()>;

    /// Evict-then-insert-or-refresh against a per-account sorted set of
    /// active session ids.
    async fn register_session(&self, key: &str, member: &str, max: u32, idle_timeout: Duration) -> Result<bool>;
    async fn active_session_count(&self, key: &str, idle_timeout: Duration) -> Result<u64>;

    /// CAS balance deduction; returns false (no mutation) on insufficient balance.
    async fn deduct_balance(&self, key: &str, amount: f64) -> Result<bool>;
    async fn increment_usage(&self, key: &str, field: &str, amount: f64) -> Result<f64>;
}

/// Redis-backed implementation. Multi-step operations run as server-side
/// Lua scripts so concurrent gateway replicas observe atomic effects.
pub struct RedisCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| GatewayError::Cache(e.to_string()))?;
        let manager = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))
    }

    async fn acquire_slot(&self, prefix: &str, request_id: &str, max: u32, ttl: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(scripts::ACQUIRE_SLOT);
        let result: i32 = script
            .key(prefix)
            .arg(request_id)
            .arg(max)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))?;
        Ok(result == 1)
    }

    async fn release_slot(&self, prefix: &str, request_id: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(scripts::RELEASE_SLOT);
        let key = format!("{prefix}{request_id}");
        let _: i32 = script
            .key(key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn register_session(&self, key: &str, member: &str, max: u32, idle_timeout: Duration) -> Result<bool> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(scripts::REGISTER_SESSION);
        let result: i32 = script
            .key(key)
            .arg(member)
            .arg(max)
            .arg(idle_timeout.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))?;
        Ok(result == 1)
    }

    async fn active_session_count(&self, key: &str, idle_timeout: Duration) -> Result<u64> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(scripts::ACTIVE_SESSION_COUNT);
        script
            .key(key)
            .arg(idle_timeout.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))
    }

    async fn deduct_balance(&self, key: &str, amount: f64) -> Result<bool> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(scripts::DEDUCT_BALANCE);
        let result: i32 = script
            .key(key)
            .arg(amount)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))?;
        Ok(result == 1)
    }

    async fn increment_usage(&self, key: &str, field: &str, amount: f64) -> Result<f64> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(scripts::INCREMENT_USAGE);
        let result: String = script
            .key(key)
            .arg(field)
            .arg(amount)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::Cache(e.to_string()))?;
        result.parse().map_err(|_| GatewayError::Cache("non-numeric HINCRBYFLOAT result".into()))
    }
}

struct Entry {
    value: String,
    expires_at: std::time::Instant,
}

/// In-process fallback satisfying "CAS loop or per-key mutex"
/// escape hatch. Used by tests and by single-replica deployments that have
/// no Redis.
#[derive(Default)]
pub struct InMemoryCache {
    strings: Mutex<HashMap<String, Entry>>,
    sorted_sets: Mutex<HashMap<String, HashMap<String, f64>>>,
    hashes: Mutex<HashMap<String, HashMap<String, f64>>>,
}

impl InMemoryCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn now_secs() -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.strings.lock().await;
        Ok(map.get(key).filter(|e| e.expires_at > std::time::Instant::now()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut map = self.strings.lock().await;
        map.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: std::time::Instant::now() + ttl },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut map = self.strings.lock().await;
        map.remove(key);
        Ok(())
    }

    async fn acquire_slot(&self, prefix: &str, request_id: &str, max: u32, ttl: Duration) -> Result<bool> {
        let mut map = self.strings.lock().await;
        let now = std::time::Instant::now();
        map.retain(|_, e| e.expires_at > now);
        let slot_key = format!("{prefix}{request_id}");
        if map.contains_key(&slot_key) {
            map.get_mut(&slot_key).unwrap().expires_at = now + ttl;
            return Ok(true);
        }
        let count = map.keys().filter(|k| k.starts_with(prefix)).count() as u32;
        if count < max {
            map.insert(slot_key, Entry { value: "1".into(), expires_at: now + ttl });
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_slot(&self, prefix: &str, request_id: &str) -> Result<()> {
        let mut map = self.strings.lock().await;
        map.remove(&format!("{prefix}{request_id}"));
        Ok(())
    }

    async fn register_session(&self, key: &str, member: &str, max: u32, idle_timeout: Duration) -> Result<bool> {
        let mut sets = self.sorted_sets.lock().await;
        let set = sets.entry(key.to_string()).or_default();
        let now = Self::now_secs();
        let cutoff = now - idle_timeout.as_secs_f64();
        set.retain(|_, score| *score > cutoff);
        if set.contains_key(member) {
            set.insert(member.to_string(), now);
            return Ok(true);
        }
        if (set.len() as u32) < max {
            set.insert(member.to_string(), now);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn active_session_count(&self, key: &str, idle_timeout: Duration) -> Result<u64> {
        let mut sets = self.sorted_sets.lock().await;
        let set = sets.entry(key.to_string()).or_default();
        let now = Self::now_secs();
        let cutoff = now - idle_timeout.as_secs_f64();
        set.retain(|_, score| *score > cutoff);
        Ok(set.len() as u64)
    }

    async fn deduct_balance(&self, key: &str, amount: f64) -> Result<bool> {
        let mut map = self.strings.lock().await;
        let now = std::time::Instant::now();
        let current: f64 = map
            .get(key)
            .filter(|e| e.expires_at > now)
            .and_then(|e| e.value.parse().ok())
            .unwrap_or(0.0);
        if current < amount {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry { value: (current - amount).to_string(), expires_at: now + Duration::from_secs(3600) },
        );
        Ok(true)
    }

    async fn increment_usage(&self, key: &str, field: &str, amount: f64) -> Result<f64> {
        let mut hashes = self.hashes.lock().await;
        let hash = hashes.entry(key.to_string()).or_default();
        let entry = hash.entry(field.to_string()).or_insert(0.0);
        *entry += amount;
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_slot_respects_max() {
        let cache = InMemoryCache::new();
        assert!(cache.acquire_slot("slot:account:a:", "r1", 1, Duration::from_secs(60)).await.unwrap());
        assert!(!cache.acquire_slot("slot:account:a:", "r2", 1, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_slot_reentrant_for_same_request_id() {
        let cache = InMemoryCache::new();
        assert!(cache.acquire_slot("slot:account:a:", "r1", 1, Duration::from_secs(60)).await.unwrap());
        assert!(cache.acquire_slot("slot:account:a:", "r1", 1, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_then_release_restores_capacity() {
        let cache = InMemoryCache::new();
        assert!(cache.acquire_slot("slot:account:a:", "r1", 1, Duration::from_secs(60)).await.unwrap());
        cache.release_slot("slot:account:a:", "r1").await.unwrap();
        assert!(cache.acquire_slot("slot:account:a:", "r2", 1, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn max_zero_never_acquires() {
        let cache = InMemoryCache::new();
        assert!(!cache.acquire_slot("slot:account:a:", "r1", 0, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn register_session_refreshes_existing_member() {
        let cache = InMemoryCache::new();
        assert!(cache.register_session("sessions:a", "s1", 1, Duration::from_secs(1800)).await.unwrap());
        assert!(cache.register_session("sessions:a", "s1", 1, Duration::from_secs(1800)).await.unwrap());
        assert_eq!(cache.active_session_count("sessions:a", Duration::from_secs(1800)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn register_session_rejects_beyond_max() {
        let cache = InMemoryCache::new();
        assert!(cache.register_session("sessions:a", "s1", 1, Duration::from_secs(1800)).await.unwrap());
        assert!(!cache.register_session("sessions:a", "s2", 1, Duration::from_secs(1800)).await.unwrap());
    }

    #[tokio::test]
    async fn deduct_balance_fails_closed_on_insufficient_funds() {
        let cache = InMemoryCache::new();
        cache.set("balance:u1", "1.00", Duration::from_secs(3600)).await.unwrap();
        assert!(!cache.deduct_balance("balance:u1", 5.0).await.unwrap());
    }

    #[tokio::test]
    async fn increment_usage_accumulates() {
        let cache = InMemoryCache::new();
        cache.increment_usage("usage:s1", "daily", 1.5).await.unwrap();
        let total = cache.increment_usage("usage:s1", "daily", 0.5).await.unwrap();
        assert_eq!(total, 2.0);
    }
}
