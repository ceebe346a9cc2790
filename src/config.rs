//! Configuration for the dispatch gateway.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use uuid::Uuid;

/// Top-level configuration structure, loaded from defaults + an optional
/// config file + environment variables (`GATEWAY__section__key`).
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub scheduling: SchedulingConfig,
    pub idempotency: IdempotencyConfig,
    pub billing: BillingConfig,
    pub concurrency: ConcurrencyConfig,
    pub session_limit: SessionLimitConfig,
    pub logging: LoggingConfig,
    /// Operator-managed proxy pool, keyed by the id an `Account.proxy_id`
    /// points at. Proxies aren't admin-CRUD data like accounts; they're
    /// infrastructure the operator provisions alongside the gateway itself.
    pub proxies: HashMap<Uuid, ProxyPoolEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Http,
    Socks5,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyPoolEntry {
    pub kind: ProxyKind,
    pub addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// `run_mode`: `simple` runs a single in-process scheduler/cache with no
/// cross-replica coordination; `standard` enables the outbox poller and
/// assumes a shared DB/cache across replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Simple,
    Standard,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub run_mode: RunMode,
    pub response_header_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulingConfig {
    pub outbox_poll_interval_seconds: u64,
    pub full_rebuild_interval_seconds: u64,
    pub db_fallback_enabled: bool,
    pub snapshot_stale_threshold_seconds: u64,
    pub sticky_reserve_usd: f64,
    pub repeated_failure_threshold: u32,
    pub short_backoff_seconds: i64,
    pub long_backoff_seconds: i64,
    pub overload_ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    pub processing_timeout_seconds: i64,
    pub record_ttl_seconds: i64,
    pub retry_backoff_seconds: i64,
    pub sweep_batch_limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub cache_ttl_seconds: i64,
    pub cache_jitter_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    pub slot_ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionLimitConfig {
    pub default_idle_timeout_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl GatewayConfig {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let cfg = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.cors_origins", vec!["*"])?
            .set_default("server.run_mode", "standard")?
            .set_default("server.response_header_timeout_secs", 120)?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 5)?
            .set_default("scheduling.outbox_poll_interval_seconds", 2)?
            .set_default("scheduling.full_rebuild_interval_seconds", 30)?
            .set_default("scheduling.db_fallback_enabled", true)?
            .set_default("scheduling.snapshot_stale_threshold_seconds", 120)?
            .set_default("scheduling.sticky_reserve_usd", 0.0)?
            .set_default("scheduling.repeated_failure_threshold", 3)?
            .set_default("scheduling.short_backoff_seconds", 60)?
            .set_default("scheduling.long_backoff_seconds", 1800)?
            .set_default("scheduling.overload_ttl_seconds", 60)?
            .set_default("idempotency.processing_timeout_seconds", 60)?
            .set_default("idempotency.record_ttl_seconds", 86400)?
            .set_default("idempotency.retry_backoff_seconds", 5)?
            .set_default("idempotency.sweep_batch_limit", 500)?
            .set_default("billing.cache_ttl_seconds", 300)?
            .set_default("billing.cache_jitter_seconds", 30)?
            .set_default("concurrency.slot_ttl_seconds", 600)?
            .set_default("session_limit.default_idle_timeout_minutes", 30)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::File::with_name("proxies").required(false))
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"))
            .build()?;

        let proxies: HashMap<Uuid, ProxyPoolEntry> = cfg.get("proxies").unwrap_or_default();

        Ok(GatewayConfig {
            server: ServerConfig {
                host: cfg.get("server.host").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: cfg.get("server.port").unwrap_or(8080),
                cors_origins: cfg
                    .get("server.cors_origins")
                    .unwrap_or_else(|_| vec!["*".to_string()]),
                run_mode: cfg.get("server.run_mode").unwrap_or(RunMode::Standard),
                response_header_timeout_secs: cfg
                    .get("server.response_header_timeout_secs")
                    .unwrap_or(120),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/gateway".to_string()),
                max_connections: cfg.get("database.max_connections").unwrap_or(20),
                min_connections: cfg.get("database.min_connections").unwrap_or(5),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            scheduling: SchedulingConfig {
                outbox_poll_interval_seconds: cfg
                    .get("scheduling.outbox_poll_interval_seconds")
                    .unwrap_or(2),
                full_rebuild_interval_seconds: cfg
                    .get("scheduling.full_rebuild_interval_seconds")
                    .unwrap_or(30),
                db_fallback_enabled: cfg.get("scheduling.db_fallback_enabled").unwrap_or(true),
                snapshot_stale_threshold_seconds: cfg
                    .get("scheduling.snapshot_stale_threshold_seconds")
                    .unwrap_or(120),
                sticky_reserve_usd: cfg.get("scheduling.sticky_reserve_usd").unwrap_or(0.0),
                repeated_failure_threshold: cfg
                    .get("scheduling.repeated_failure_threshold")
                    .unwrap_or(3),
                short_backoff_seconds: cfg.get("scheduling.short_backoff_seconds").unwrap_or(60),
                long_backoff_seconds: cfg.get("scheduling.long_backoff_seconds").unwrap_or(1800),
                overload_ttl_seconds: cfg.get("scheduling.overload_ttl_seconds").unwrap_or(60),
            },
            idempotency: IdempotencyConfig {
                processing_timeout_seconds: cfg
                    .get("idempotency.processing_timeout_seconds")
                    .unwrap_or(60),
                record_ttl_seconds: cfg.get("idempotency.record_ttl_seconds").unwrap_or(86400),
                retry_backoff_seconds: cfg.get("idempotency.retry_backoff_seconds").unwrap_or(5),
                sweep_batch_limit: cfg.get("idempotency.sweep_batch_limit").unwrap_or(500),
            },
            billing: BillingConfig {
                cache_ttl_seconds: cfg.get("billing.cache_ttl_seconds").unwrap_or(300),
                cache_jitter_seconds: cfg.get("billing.cache_jitter_seconds").unwrap_or(30),
            },
            concurrency: ConcurrencyConfig {
                slot_ttl_seconds: cfg.get("concurrency.slot_ttl_seconds").unwrap_or(600),
            },
            session_limit: SessionLimitConfig {
                default_idle_timeout_minutes: cfg
                    .get("session_limit.default_idle_timeout_minutes")
                    .unwrap_or(30),
            },
            logging: LoggingConfig {
                level: cfg.get("logging.level").unwrap_or_else(|_| "info".to_string()),
                format: cfg.get("logging.format").unwrap_or_else(|_| "json".to_string()),
            },
            proxies,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_loads_with_defaults() {
        let cfg = GatewayConfig::load();
        assert!(cfg.is_ok());
    }

    #[test]
    fn server_addr_joins_host_and_port() {
        let cfg = GatewayConfig::load().unwrap();
        assert!(cfg.server_addr().contains(':'));
    }
}
