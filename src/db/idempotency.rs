//! Idempotency record repository backing the coordinator's own/replay logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use super::DbPool;
use crate::types::{IdempotencyRecord, IdempotencyStatus};

/// Storage contract the coordinator drives its own/replay/reclaim logic
/// against. Lets tests exercise `begin()`'s branches against an in-memory
/// fake instead of a live database, the same way `Cache` decouples the
/// limiter from Redis.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn create_processing(
        &self,
        scope: &str,
        key_hash: &str,
        fingerprint: &str,
        locked_until: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRow>, sqlx::Error>;

    async fn get_by_scope_and_key_hash(&self, scope: &str, key_hash: &str) -> Result<Option<IdempotencyRow>, sqlx::Error>;

    async fn try_reclaim(
        &self,
        id: Uuid,
        from_status: &str,
        now: DateTime<Utc>,
        new_locked_until: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error>;

    async fn extend_processing_lock(&self, id: Uuid, fingerprint: &str, new_locked_until: DateTime<Utc>) -> Result<bool, sqlx::Error>;

    async fn mark_succeeded(
        &self,
        id: Uuid,
        response_status: i32,
        response_body: &JsonValue,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    async fn mark_failed_retryable(
        &self,
        id: Uuid,
        reason: &str,
        locked_until: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, sqlx::Error>;
}

#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRow {
    pub id: Uuid,
    pub scope: String,
    pub idempotency_key_hash: String,
    pub request_fingerprint: String,
    pub status: String,
    pub response_status: Option<i32>,
    pub response_body: Option<JsonValue>,
    pub error_reason: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRow {
    pub fn into_record(self) -> Option<IdempotencyRecord> {
        let status = match self.status.as_str() {
            "processing" => IdempotencyStatus::Processing,
            "succeeded" => IdempotencyStatus::Succeeded,
            "failed_retryable" => IdempotencyStatus::FailedRetryable,
            _ => return None,
        };
        Some(IdempotencyRecord {
            id: self.id,
            scope: self.scope,
            idempotency_key_hash: self.idempotency_key_hash,
            request_fingerprint: self.request_fingerprint,
            status,
            response_status: self.response_status,
            response_body: self.response_body,
            error_reason: self.error_reason,
            locked_until: self.locked_until,
            expires_at: self.expires_at,
        })
    }
}

#[derive(Clone)]
pub struct IdempotencyRepository {
    pool: DbPool,
}

impl IdempotencyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for IdempotencyRepository {
    /// Returns `Ok(Some(row))` on success (we are the owner); `Ok(None)` on
    /// unique-constraint conflict (row already exists).
    async fn create_processing(
        &self,
        scope: &str,
        key_hash: &str,
        fingerprint: &str,
        locked_until: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRow>, sqlx::Error> {
        let result = sqlx::query_as::<_, IdempotencyRow>(
            r#"
            INSERT INTO idempotency_records
                (id, scope, idempotency_key_hash, request_fingerprint, status, locked_until, expires_at)
            VALUES ($1, $2, $3, $4, 'processing', $5, $6)
            ON CONFLICT (scope, idempotency_key_hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scope)
        .bind(key_hash)
        .bind(fingerprint)
        .bind(locked_until)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn get_by_scope_and_key_hash(
        &self,
        scope: &str,
        key_hash: &str,
    ) -> Result<Option<IdempotencyRow>, sqlx::Error> {
        sqlx::query_as::<_, IdempotencyRow>(
            "SELECT * FROM idempotency_records WHERE scope = $1 AND idempotency_key_hash = $2",
        )
        .bind(scope)
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
    }

    /// CAS: only transitions when `status` still matches `from` and the lock
    /// has expired (or the row never locked).
    async fn try_reclaim(
        &self,
        id: Uuid,
        from_status: &str,
        now: DateTime<Utc>,
        new_locked_until: DateTime<Utc>,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET status = 'processing', locked_until = $1, expires_at = $2
            WHERE id = $3 AND status = $4 AND (locked_until IS NULL OR locked_until <= $5)
            "#,
        )
        .bind(new_locked_until)
        .bind(new_expires_at)
        .bind(id)
        .bind(from_status)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn extend_processing_lock(
        &self,
        id: Uuid,
        fingerprint: &str,
        new_locked_until: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE idempotency_records SET locked_until = $1 WHERE id = $2 AND status = 'processing' AND request_fingerprint = $3",
        )
        .bind(new_locked_until)
        .bind(id)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        response_status: i32,
        response_body: &JsonValue,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE idempotency_records SET status = 'succeeded', response_status = $1, response_body = $2, expires_at = $3, locked_until = NULL WHERE id = $4",
        )
        .bind(response_status)
        .bind(response_body)
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed_retryable(
        &self,
        id: Uuid,
        reason: &str,
        locked_until: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE idempotency_records SET status = 'failed_retryable', error_reason = $1, locked_until = $2, expires_at = $3 WHERE id = $4",
        )
        .bind(reason)
        .bind(locked_until)
        .bind(expires_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes expired records in bounded batches ordered by `expires_at`.
    async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_records
            WHERE id IN (
                SELECT id FROM idempotency_records
                WHERE expires_at <= $1
                ORDER BY expires_at
                LIMIT $2
            )
            "#,
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
