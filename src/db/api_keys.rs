//! API key repository — resolves the inbound caller auth surface.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::DbPool;
use crate::types::{ApiKey, ApiKeyStatus};

#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key: String,
    pub group_id: Option<Uuid>,
    pub status: String,
    pub ip_whitelist: Vec<String>,
    pub ip_blacklist: Vec<String>,
    pub quota: f64,
    pub quota_used: f64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKeyRow {
    pub fn into_api_key(self) -> Option<ApiKey> {
        let status = match self.status.as_str() {
            "active" => ApiKeyStatus::Active,
            "disabled" => ApiKeyStatus::Disabled,
            "expired" => ApiKeyStatus::Expired,
            _ => return None,
        };
        Some(ApiKey {
            id: self.id,
            user_id: self.user_id,
            key: self.key,
            group_id: self.group_id,
            status,
            ip_whitelist: self.ip_whitelist,
            ip_blacklist: self.ip_blacklist,
            quota: self.quota,
            quota_used: self.quota_used,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: DbPool,
}

impl ApiKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<ApiKeyRow>, sqlx::Error> {
        sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn increment_quota_used(&self, id: Uuid, amount: f64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_keys SET quota_used = quota_used + $1 WHERE id = $2")
            .bind(amount)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
