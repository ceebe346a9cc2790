//! Scheduler outbox repository: append-only scheduling-state deltas, polled
//! FIFO to propagate mutations across gateway replicas sharing one DB
//! ("outbox replay").

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::DbPool;
use crate::types::{OutboxEvent, OutboxEventKind};

#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub id: i64,
    pub account_id: Uuid,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl OutboxRow {
    pub fn into_event(self) -> Option<OutboxEvent> {
        let kind = match self.kind.as_str() {
            "status_changed" => OutboxEventKind::StatusChanged,
            "schedulable_changed" => OutboxEventKind::SchedulableChanged,
            "rate_limit_changed" => OutboxEventKind::RateLimitChanged,
            "overload_changed" => OutboxEventKind::OverloadChanged,
            "last_used_changed" => OutboxEventKind::LastUsedChanged,
            _ => return None,
        };
        Some(OutboxEvent {
            id: self.id,
            account_id: self.account_id,
            kind,
            created_at: self.created_at,
        })
    }
}

#[derive(Clone)]
pub struct OutboxRepository {
    pool: DbPool,
}

impl OutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, account_id: Uuid, kind: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO scheduler_outbox (account_id, kind, created_at) VALUES ($1, $2, NOW())")
            .bind(account_id)
            .bind(kind)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drains events strictly after `after_id`, FIFO, up to `limit`.
    pub async fn poll_after(&self, after_id: i64, limit: i64) -> Result<Vec<OutboxRow>, sqlx::Error> {
        sqlx::query_as::<_, OutboxRow>(
            "SELECT * FROM scheduler_outbox WHERE id > $1 ORDER BY id ASC LIMIT $2",
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
