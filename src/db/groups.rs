//! Group repository.

use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::DbPool;
use crate::types::{Group, GroupStatus, Platform, SubscriptionType};

#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    pub id: Uuid,
    pub platform: String,
    pub status: String,
    pub rate_multiplier: f64,
    pub is_exclusive: bool,
    pub subscription_type: String,
    pub daily_limit_usd: Option<f64>,
    pub weekly_limit_usd: Option<f64>,
    pub monthly_limit_usd: Option<f64>,
    pub claude_code_only: bool,
    pub fallback_group_id: Option<Uuid>,
    pub fallback_group_id_on_invalid_request: Option<Uuid>,
    pub model_routing: JsonValue,
    pub model_routing_enabled: bool,
}

impl GroupRow {
    pub fn into_group(self) -> Option<Group> {
        let platform = Platform::from_str(&self.platform).ok()?;
        let status = match self.status.as_str() {
            "active" => GroupStatus::Active,
            "disabled" => GroupStatus::Disabled,
            _ => return None,
        };
        let subscription_type = match self.subscription_type.as_str() {
            "pay_per_token" => SubscriptionType::PayPerToken,
            "standard" => SubscriptionType::Standard,
            _ => return None,
        };
        let model_routing: HashMap<String, Vec<Uuid>> =
            serde_json::from_value(self.model_routing).unwrap_or_default();

        Some(Group {
            id: self.id,
            platform,
            status,
            rate_multiplier: self.rate_multiplier,
            is_exclusive: self.is_exclusive,
            subscription_type,
            daily_limit_usd: self.daily_limit_usd,
            weekly_limit_usd: self.weekly_limit_usd,
            monthly_limit_usd: self.monthly_limit_usd,
            claude_code_only: self.claude_code_only,
            fallback_group_id: self.fallback_group_id,
            fallback_group_id_on_invalid_request: self.fallback_group_id_on_invalid_request,
            model_routing,
            model_routing_enabled: self.model_routing_enabled,
        })
    }
}

#[derive(Clone)]
pub struct GroupRepository {
    pool: DbPool,
}

impl GroupRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<GroupRow>, sqlx::Error> {
        sqlx::query_as::<_, GroupRow>("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<GroupRow>, sqlx::Error> {
        sqlx::query_as::<_, GroupRow>("SELECT * FROM groups")
            .fetch_all(&self.pool)
            .await
    }
}
