//! Concurrency & Session Limiter: acquire order is
//! user-slot → account-slot → session-slot; release order is the reverse.
//! Any partial failure releases acquired resources before propagating.

pub mod concurrency;
pub mod session;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use concurrency::{account_slot_prefix, user_slot_prefix, ConcurrencySlots};
pub use session::SessionLimiter;

use crate::cache::Cache;
use crate::error::{GatewayError, Result};

/// A request's acquired resources, released in reverse acquisition order by
/// `Lease::release` or automatically if dropped without an explicit release
/// (leaked slots still expire via TTL, bounding the blast radius).
pub struct Lease {
    user_id: Uuid,
    account_id: Uuid,
    request_id: String,
    user_acquired: bool,
    account_acquired: bool,
}

pub struct Limiter {
    concurrency: ConcurrencySlots,
    sessions: SessionLimiter,
}

impl Limiter {
    pub fn new(cache: Arc<dyn Cache>, slot_ttl: Duration, session_idle_timeout: Duration) -> Self {
        Self {
            concurrency: ConcurrencySlots::new(cache.clone(), slot_ttl),
            sessions: SessionLimiter::new(cache, session_idle_timeout),
        }
    }

    /// Acquires user slot, then account slot. On partial failure, releases
    /// what was acquired before returning.
    pub async fn acquire(
        &self,
        user_id: Uuid,
        user_max: u32,
        account_id: Uuid,
        account_max: u32,
        request_id: &str,
    ) -> Result<Lease> {
        let user_prefix = user_slot_prefix(user_id);
        let account_prefix = account_slot_prefix(account_id);

        let user_ok = self.concurrency.acquire(&user_prefix, user_max, request_id).await?;
        if !user_ok {
            return Err(GatewayError::Quota(crate::error::QuotaError::WindowLimitExceeded(
                "user concurrency limit".into(),
            )));
        }

        let account_ok = self.concurrency.acquire(&account_prefix, account_max, request_id).await;
        match account_ok {
            Ok(true) => Ok(Lease {
                user_id,
                account_id,
                request_id: request_id.to_string(),
                user_acquired: true,
                account_acquired: true,
            }),
            Ok(false) => {
                self.concurrency.release(&user_prefix, request_id).await?;
                Err(GatewayError::UpstreamTransient("account concurrency limit".into()))
            }
            Err(e) => {
                self.concurrency.release(&user_prefix, request_id).await?;
                Err(e)
            }
        }
    }

    /// Releases in reverse order: account slot, then user slot.
    pub async fn release(&self, lease: &Lease) -> Result<()> {
        if lease.account_acquired {
            self.concurrency
                .release(&account_slot_prefix(lease.account_id), &lease.request_id)
                .await?;
        }
        if lease.user_acquired {
            self.concurrency
                .release(&user_slot_prefix(lease.user_id), &lease.request_id)
                .await?;
        }
        Ok(())
    }

    pub async fn register_session(&self, account_id: Uuid, session_uuid: &str, max: u32) -> Result<bool> {
        self.sessions.register_session(account_id, session_uuid, max).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn concurrency_cap_of_one_admits_one_then_releases() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let limiter = Limiter::new(cache, Duration::from_secs(600), Duration::from_secs(1800));
        let user_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();

        let lease1 = limiter.acquire(user_id, 1, account_id, 10, "req-1").await.unwrap();
        let second = limiter.acquire(user_id, 1, account_id, 10, "req-2").await;
        assert!(second.is_err());

        limiter.release(&lease1).await.unwrap();
        let third = limiter.acquire(user_id, 1, account_id, 10, "req-3").await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn account_limit_failure_releases_already_acquired_user_slot() {
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let limiter = Limiter::new(cache, Duration::from_secs(600), Duration::from_secs(1800));
        let user_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();

        // exhaust the account slot from a different user first
        let other_user = Uuid::new_v4();
        let _blocker = limiter.acquire(other_user, 10, account_id, 1, "blocker").await.unwrap();

        let result = limiter.acquire(user_id, 10, account_id, 1, "req-1").await;
        assert!(result.is_err());

        // user slot must have been released, so this same user can still acquire elsewhere
        let other_account = Uuid::new_v4();
        let retry = limiter.acquire(user_id, 1, other_account, 10, "req-2").await;
        assert!(retry.is_ok());
    }
}
