//! User subscription repository: window-usage accounting for billing resets.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::DbPool;
use crate::types::{SubscriptionStatus, UserSubscription};

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub group_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub daily_window_start: Option<DateTime<Utc>>,
    pub weekly_window_start: Option<DateTime<Utc>>,
    pub monthly_window_start: Option<DateTime<Utc>>,
    pub daily_usage_usd: f64,
    pub weekly_usage_usd: f64,
    pub monthly_usage_usd: f64,
    pub version: i64,
}

impl SubscriptionRow {
    pub fn into_subscription(self) -> Option<UserSubscription> {
        let status = match self.status.as_str() {
            "active" => SubscriptionStatus::Active,
            "expired" => SubscriptionStatus::Expired,
            _ => return None,
        };
        Some(UserSubscription {
            id: self.id,
            user_id: self.user_id,
            group_id: self.group_id,
            starts_at: self.starts_at,
            expires_at: self.expires_at,
            status,
            daily_window_start: self.daily_window_start,
            weekly_window_start: self.weekly_window_start,
            monthly_window_start: self.monthly_window_start,
            daily_usage_usd: self.daily_usage_usd,
            weekly_usage_usd: self.weekly_usage_usd,
            monthly_usage_usd: self.monthly_usage_usd,
            version: self.version,
        })
    }
}

#[derive(Clone)]
pub struct SubscriptionRepository {
    pool: DbPool,
}

impl SubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_for_user_group(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<Option<SubscriptionRow>, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM user_subscriptions WHERE user_id = $1 AND group_id = $2",
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resets a window's usage to zero and advances its start, bumping `version`.
    /// Caller supplies which window (`daily`, `weekly`, `monthly`) via column name
    /// built from a closed, known set — never from user input.
    pub async fn reset_window(
        &self,
        id: Uuid,
        window: &str,
        new_start: DateTime<Utc>,
        expected_version: i64,
    ) -> Result<bool, sqlx::Error> {
        let (start_col, usage_col) = match window {
            "daily" => ("daily_window_start", "daily_usage_usd"),
            "weekly" => ("weekly_window_start", "weekly_usage_usd"),
            "monthly" => ("monthly_window_start", "monthly_usage_usd"),
            other => return Err(sqlx::Error::Protocol(format!("unknown window: {other}"))),
        };
        let sql = format!(
            "UPDATE user_subscriptions SET {start_col} = $1, {usage_col} = 0, version = version + 1 \
             WHERE id = $2 AND version = $3"
        );
        let result = sqlx::query(&sql)
            .bind(new_start)
            .bind(id)
            .bind(expected_version)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_usage(&self, id: Uuid, window: &str, amount: f64) -> Result<(), sqlx::Error> {
        let usage_col = match window {
            "daily" => "daily_usage_usd",
            "weekly" => "weekly_usage_usd",
            "monthly" => "monthly_usage_usd",
            other => return Err(sqlx::Error::Protocol(format!("unknown window: {other}"))),
        };
        let sql = format!("UPDATE user_subscriptions SET {usage_col} = {usage_col} + $1 WHERE id = $2");
        sqlx::query(&sql).bind(amount).bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
