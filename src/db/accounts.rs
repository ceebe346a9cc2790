//! Account repository: the persistence side of the account contract the
//! scheduler and rate-limit markers mutate through.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::DbPool;
use crate::types::{Account, AccountStatus, AccountType, Platform, SchedulingState};

#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub name: String,
    pub platform: String,
    pub account_type: String,
    pub credentials: JsonValue,
    pub extra: JsonValue,
    pub proxy_id: Option<Uuid>,
    pub concurrency_cap: i32,
    pub priority: i32,
    pub schedulable: bool,
    pub status: String,
    pub rate_limited_at: Option<DateTime<Utc>>,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    pub overload_until: Option<DateTime<Utc>>,
    pub temp_unschedulable_until: Option<DateTime<Utc>>,
    pub temp_unschedulable_reason: Option<String>,
    pub session_window_start: Option<DateTime<Utc>>,
    pub session_window_end: Option<DateTime<Utc>>,
    pub session_window_status: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub billing_rate_multiplier: f64,
}

impl AccountRow {
    pub fn into_account(self) -> Option<Account> {
        let platform = Platform::from_str(&self.platform).ok()?;
        let account_type = match self.account_type.as_str() {
            "oauth" => AccountType::Oauth,
            "api_key" => AccountType::ApiKey,
            "setup_token" => AccountType::SetupToken,
            _ => return None,
        };
        let status = match self.status.as_str() {
            "active" => AccountStatus::Active,
            "error" => AccountStatus::Error,
            "disabled" => AccountStatus::Disabled,
            _ => return None,
        };
        let credentials: HashMap<String, String> =
            serde_json::from_value(self.credentials).unwrap_or_default();
        let extra: HashMap<String, JsonValue> = serde_json::from_value(self.extra).unwrap_or_default();

        Some(Account {
            id: self.id,
            name: self.name,
            platform,
            account_type,
            credentials,
            extra,
            proxy_id: self.proxy_id,
            scheduling: SchedulingState {
                concurrency_cap: self.concurrency_cap.max(0) as u32,
                priority: self.priority,
                schedulable: self.schedulable,
                status,
                rate_limited_at: self.rate_limited_at,
                rate_limit_reset_at: self.rate_limit_reset_at,
                overload_until: self.overload_until,
                temp_unschedulable_until: self.temp_unschedulable_until,
                temp_unschedulable_reason: self.temp_unschedulable_reason,
                session_window_start: self.session_window_start,
                session_window_end: self.session_window_end,
                session_window_status: self.session_window_status,
                last_used_at: self.last_used_at,
            },
            billing_rate_multiplier: self.billing_rate_multiplier,
        })
    }
}

#[derive(Clone)]
pub struct AccountRepository {
    pool: DbPool,
}

impl AccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<AccountRow>, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn list_by_group(&self, group_id: Uuid) -> Result<Vec<AccountRow>, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT a.* FROM accounts a
            JOIN account_groups ag ON ag.account_id = a.id
            WHERE ag.group_id = $1
            ORDER BY ag.priority ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Full snapshot source: every account, used by the scheduler's full rebuild.
    pub async fn list_all(&self) -> Result<Vec<AccountRow>, sqlx::Error> {
        sqlx::query_as::<_, AccountRow>("SELECT * FROM accounts")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn set_overloaded(&self, id: Uuid, until: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET overload_until = $1 WHERE id = $2")
            .bind(until)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_rate_limited(&self, id: Uuid, reset_at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET rate_limited_at = NOW(), rate_limit_reset_at = $1 WHERE id = $2",
        )
        .bind(reset_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_rate_limit(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET rate_limited_at = NULL, rate_limit_reset_at = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_error(&self, id: Uuid, reason: &str, until: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET status = 'error', temp_unschedulable_until = $1, temp_unschedulable_reason = $2 WHERE id = $3",
        )
        .bind(until)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_temp_unschedulable(
        &self,
        id: Uuid,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET temp_unschedulable_until = $1, temp_unschedulable_reason = $2 WHERE id = $3",
        )
        .bind(until)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET last_used_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_session_window(
        &self,
        id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE accounts SET session_window_start = $1, session_window_end = $2, session_window_status = $3 WHERE id = $4",
        )
        .bind(start)
        .bind(end)
        .bind(status)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> AccountRow {
        AccountRow {
            id: Uuid::new_v4(),
            name: "acc".into(),
            platform: "anthropic".into(),
            account_type: "oauth".into(),
            credentials: serde_json::json!({}),
            extra: serde_json::json!({}),
            proxy_id: None,
            concurrency_cap: 2,
            priority: 0,
            schedulable: true,
            status: "active".into(),
            rate_limited_at: None,
            rate_limit_reset_at: None,
            overload_until: None,
            temp_unschedulable_until: None,
            temp_unschedulable_reason: None,
            session_window_start: None,
            session_window_end: None,
            session_window_status: None,
            last_used_at: None,
            billing_rate_multiplier: 1.0,
        }
    }

    #[test]
    fn row_converts_to_account() {
        let account = row().into_account().expect("should convert");
        assert_eq!(account.platform, Platform::Anthropic);
        assert_eq!(account.account_type, AccountType::Oauth);
    }

    #[test]
    fn unknown_platform_fails_conversion() {
        let mut r = row();
        r.platform = "bogus".into();
        assert!(r.into_account().is_none());
    }
}
