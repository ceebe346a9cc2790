//! Application state: wires repositories, cache, scheduler, limiter, and the
//! dispatch core components together behind a single `Arc<AppState>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::billing::{BillingEnforcer, SubscriptionCache};
use crate::cache::{Cache, InMemoryCache, RedisCache};
use crate::config::GatewayConfig;
use crate::db::{
    AccountRepository, ApiKeyRepository, DbPool, GroupRepository, IdempotencyRepository, OutboxRepository,
    SubscriptionRepository, UsageLogRepository, UserRepository,
};
use crate::dispatch::DispatchCore;
use crate::executor::providers::{AnthropicAdapter, AntigravityAdapter, GeminiAdapter, OpenAiAdapter};
use crate::executor::{FailoverConfig, ProviderAdapter};
use crate::idempotency::{spawn_sweep, IdempotencyCoordinator};
use crate::limiter::Limiter;
use crate::ratelimit::{ClassifyConfig, MarkerApplier};
use crate::scheduler::{Scheduler, StickyBindings};
use crate::types::Platform;

pub struct AppState {
    pub api_keys: ApiKeyRepository,
    pub users: UserRepository,
    pub groups: GroupRepository,
    pub scheduler: Arc<Scheduler>,
    pub dispatch: DispatchCore,
    pub start_time: std::time::Instant,
    pub version: String,
}

impl AppState {
    pub async fn build(config: &GatewayConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let pool: DbPool =
            crate::db::pool::init_pool(&config.database.url, config.database.max_connections, config.database.min_connections)
                .await?;
        crate::db::pool::run_migrations(&pool).await?;

        let cache: Arc<dyn Cache> = match RedisCache::connect(&config.redis.url).await {
            Ok(redis) => {
                tracing::info!("connected to redis cache backend");
                Arc::new(redis)
            }
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable, falling back to in-memory cache (single-process only)");
                InMemoryCache::new()
            }
        };

        let accounts = AccountRepository::new(pool.clone());
        let groups_repo = GroupRepository::new(pool.clone());
        let outbox = OutboxRepository::new(pool.clone());
        let marker_outbox = outbox.clone();
        let api_keys = ApiKeyRepository::new(pool.clone());
        let users = UserRepository::new(pool.clone());
        let subscriptions = SubscriptionRepository::new(pool.clone());
        let usage_logs = UsageLogRepository::new(pool.clone());
        let idempotency_repo = IdempotencyRepository::new(pool.clone());

        let scheduler = Scheduler::new(
            accounts.clone(),
            groups_repo.clone(),
            outbox,
            Duration::from_secs(config.scheduling.full_rebuild_interval_seconds),
            Duration::from_secs(config.scheduling.outbox_poll_interval_seconds),
        );
        scheduler.start();

        let limiter = Limiter::new(
            cache.clone(),
            Duration::from_secs(config.concurrency.slot_ttl_seconds as u64),
            Duration::from_secs(config.session_limit.default_idle_timeout_minutes as u64 * 60),
        );

        let idempotency = IdempotencyCoordinator::new(
            idempotency_repo,
            config.idempotency.processing_timeout_seconds,
            config.idempotency.record_ttl_seconds,
            config.idempotency.retry_backoff_seconds,
        );

        let subscription_cache = SubscriptionCache::new(cache.clone(), config.billing.cache_ttl_seconds, config.billing.cache_jitter_seconds);
        let billing = BillingEnforcer::new(users.clone(), api_keys.clone(), subscriptions, usage_logs, subscription_cache, cache.clone());

        let markers = MarkerApplier::new(accounts, scheduler.clone())
            .with_auth_refresh_hook(Arc::new(crate::ratelimit::OutboxAuthRefreshHook::new(marker_outbox)));
        let sticky = StickyBindings::new(cache.clone());

        let mut adapters: HashMap<Platform, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(Platform::Anthropic, Arc::new(AnthropicAdapter::new("https://api.anthropic.com")));
        adapters.insert(Platform::OpenAi, Arc::new(OpenAiAdapter::new("https://api.openai.com/v1")));
        adapters.insert(Platform::Gemini, Arc::new(GeminiAdapter::new("https://generativelanguage.googleapis.com")));
        adapters.insert(Platform::Antigravity, Arc::new(AntigravityAdapter::new("https://antigravity.internal")));

        let classify_cfg = ClassifyConfig {
            short_backoff: chrono::Duration::seconds(config.scheduling.short_backoff_seconds),
            long_backoff: chrono::Duration::seconds(config.scheduling.long_backoff_seconds),
            overload_ttl: chrono::Duration::seconds(config.scheduling.overload_ttl_seconds),
        };
        let failover_cfg = FailoverConfig {
            max_retries: 5,
            repeated_failure_threshold: config.scheduling.repeated_failure_threshold,
            response_header_timeout: Duration::from_secs(config.server.response_header_timeout_secs),
        };

        let dispatch = DispatchCore {
            scheduler: scheduler.clone(),
            limiter,
            idempotency,
            billing,
            markers,
            cache,
            sticky,
            adapters,
            classify_cfg,
            failover_cfg,
            sticky_reserve_usd: config.scheduling.sticky_reserve_usd,
            proxies: config.proxies.clone(),
        };

        spawn_sweep(
            Arc::new(IdempotencyCoordinator::new(
                IdempotencyRepository::new(pool.clone()),
                config.idempotency.processing_timeout_seconds,
                config.idempotency.record_ttl_seconds,
                config.idempotency.retry_backoff_seconds,
            )),
            Duration::from_secs(60),
            config.idempotency.sweep_batch_limit,
        );

        Ok(Arc::new(Self {
            api_keys,
            users,
            groups: groups_repo,
            scheduler,
            dispatch,
            start_time: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
