//! Idempotency coordinator: own/replay/conflict resolution around
//! `IdempotencyRepository`, plus the fail-closed policy on repository outage.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use super::fingerprint::{fingerprint, hash_key};
use crate::db::IdempotencyStore;
use crate::error::{GatewayError, IdempotencyError, Result};

#[derive(Debug, Clone)]
pub struct Guard {
    pub record_id: Uuid,
    pub fingerprint: String,
}

#[derive(Debug)]
pub enum BeginOutcome {
    /// We are the owner; execute the call and report back via `complete_*`.
    Owner(Guard),
    /// No `Idempotency-Key` header was supplied; the scope is bypassed.
    Bypassed,
    /// A prior call with the same key already succeeded; replay its response.
    Replay { status: i32, body: JsonValue },
}

pub struct IdempotencyCoordinator {
    repo: Arc<dyn IdempotencyStore>,
    processing_timeout: ChronoDuration,
    record_ttl: ChronoDuration,
    retry_backoff: ChronoDuration,
}

impl IdempotencyCoordinator {
    pub fn new(
        repo: impl IdempotencyStore + 'static,
        processing_timeout_seconds: i64,
        record_ttl_seconds: i64,
        retry_backoff_seconds: i64,
    ) -> Self {
        Self {
            repo: Arc::new(repo),
            processing_timeout: ChronoDuration::seconds(processing_timeout_seconds),
            record_ttl: ChronoDuration::seconds(record_ttl_seconds),
            retry_backoff: ChronoDuration::seconds(retry_backoff_seconds),
        }
    }

    /// Step 1-3 of the protocol: compute key hash + fingerprint, try to take
    /// ownership, and resolve any conflict (replay / 409 / reclaim / 422).
    pub async fn begin(
        &self,
        scope: &str,
        idempotency_key: Option<&str>,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> Result<BeginOutcome> {
        let Some(key) = idempotency_key else {
            return Ok(BeginOutcome::Bypassed);
        };

        let key_hash = hash_key(key);
        let fp = fingerprint(method, path, body);
        let now = Utc::now();

        let created = self
            .repo
            .create_processing(scope, &key_hash, &fp, now + self.processing_timeout, now + self.record_ttl)
            .await
            .map_err(|_| GatewayError::Idempotency(IdempotencyError::CoordinatorUnavailable))?;

        if let Some(row) = created {
            return Ok(BeginOutcome::Owner(Guard { record_id: row.id, fingerprint: fp }));
        }

        let existing = self
            .repo
            .get_by_scope_and_key_hash(scope, &key_hash)
            .await
            .map_err(|_| GatewayError::Idempotency(IdempotencyError::CoordinatorUnavailable))?
            .ok_or_else(|| GatewayError::Internal("idempotency record vanished after conflict".into()))?;

        if existing.request_fingerprint != fp {
            return Err(GatewayError::Idempotency(IdempotencyError::FingerprintMismatch));
        }

        match existing.status.as_str() {
            "succeeded" => Ok(BeginOutcome::Replay {
                status: existing.response_status.unwrap_or(200),
                body: existing.response_body.unwrap_or_else(|| serde_json::json!({})),
            }),
            "processing" => self.try_take_over(existing.id, "processing", now, fp).await,
            "failed_retryable" => self.try_take_over(existing.id, "failed_retryable", now, fp).await,
            _ => Err(GatewayError::Internal("unrecognized idempotency record status".into())),
        }
    }

    async fn try_take_over(
        &self,
        id: Uuid,
        from_status: &str,
        now: DateTime<Utc>,
        fp: String,
    ) -> Result<BeginOutcome> {
        let reclaimed = self
            .repo
            .try_reclaim(id, from_status, now, now + self.processing_timeout, now + self.record_ttl)
            .await
            .map_err(|_| GatewayError::Idempotency(IdempotencyError::CoordinatorUnavailable))?;

        if reclaimed {
            Ok(BeginOutcome::Owner(Guard { record_id: id, fingerprint: fp }))
        } else {
            Err(GatewayError::Idempotency(IdempotencyError::Conflict))
        }
    }

    /// Called when execution outlives `processing_timeout / 2`; conditional
    /// on `(id, status=processing, fingerprint=ours)` so a reclaimed record
    /// never has its lock extended by the call that lost ownership.
    pub async fn extend_lock(&self, guard: &Guard) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .repo
            .extend_processing_lock(guard.record_id, &guard.fingerprint, now + self.processing_timeout)
            .await?)
    }

    pub async fn complete_success(&self, guard: &Guard, status: i32, body: &JsonValue) -> Result<()> {
        let expires_at = Utc::now() + self.record_ttl;
        self.repo.mark_succeeded(guard.record_id, status, body, expires_at).await?;
        Ok(())
    }

    pub async fn complete_retryable_failure(&self, guard: &Guard, reason: &str) -> Result<()> {
        let now = Utc::now();
        self.repo
            .mark_failed_retryable(guard.record_id, reason, now + self.retry_backoff, now + self.record_ttl)
            .await?;
        Ok(())
    }

    /// Non-retryable failures are stored as "succeeded" so replays return the
    /// identical error response rather than re-executing.
    pub async fn complete_non_retryable_failure(&self, guard: &Guard, status: i32, body: &JsonValue) -> Result<()> {
        self.complete_success(guard, status, body).await
    }

    pub async fn sweep_expired(&self, limit: i64) -> Result<u64> {
        Ok(self.repo.delete_expired(Utc::now(), limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::idempotency::IdempotencyRow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    /// In-memory stand-in for `IdempotencyRepository`, keyed the same way the
    /// real table is: one row per `(scope, idempotency_key_hash)`.
    #[derive(Default)]
    struct FakeStore {
        rows: AsyncMutex<HashMap<Uuid, IdempotencyRow>>,
    }

    impl FakeStore {
        fn seeded(row: IdempotencyRow) -> Self {
            let mut rows = HashMap::new();
            rows.insert(row.id, row);
            Self { rows: AsyncMutex::new(rows) }
        }
    }

    fn seed_row(scope: &str, key_hash: &str, fp: &str, status: &str, locked_until: Option<DateTime<Utc>>) -> IdempotencyRow {
        IdempotencyRow {
            id: Uuid::new_v4(),
            scope: scope.to_string(),
            idempotency_key_hash: key_hash.to_string(),
            request_fingerprint: fp.to_string(),
            status: status.to_string(),
            response_status: None,
            response_body: None,
            error_reason: None,
            locked_until,
            expires_at: Utc::now() + ChronoDuration::seconds(3600),
        }
    }

    #[async_trait]
    impl IdempotencyStore for FakeStore {
        async fn create_processing(
            &self,
            scope: &str,
            key_hash: &str,
            fp: &str,
            locked_until: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> Result<Option<IdempotencyRow>, sqlx::Error> {
            let mut rows = self.rows.lock().await;
            if rows.values().any(|r| r.scope == scope && r.idempotency_key_hash == key_hash) {
                return Ok(None);
            }
            let mut row = seed_row(scope, key_hash, fp, "processing", Some(locked_until));
            row.expires_at = expires_at;
            rows.insert(row.id, row.clone());
            Ok(Some(row))
        }

        async fn get_by_scope_and_key_hash(&self, scope: &str, key_hash: &str) -> Result<Option<IdempotencyRow>, sqlx::Error> {
            let rows = self.rows.lock().await;
            Ok(rows.values().find(|r| r.scope == scope && r.idempotency_key_hash == key_hash).cloned())
        }

        async fn try_reclaim(
            &self,
            id: Uuid,
            from_status: &str,
            now: DateTime<Utc>,
            new_locked_until: DateTime<Utc>,
            new_expires_at: DateTime<Utc>,
        ) -> Result<bool, sqlx::Error> {
            let mut rows = self.rows.lock().await;
            let Some(row) = rows.get_mut(&id) else { return Ok(false) };
            let lock_expired = row.locked_until.map(|l| l <= now).unwrap_or(true);
            if row.status != from_status || !lock_expired {
                return Ok(false);
            }
            row.status = "processing".to_string();
            row.locked_until = Some(new_locked_until);
            row.expires_at = new_expires_at;
            Ok(true)
        }

        async fn extend_processing_lock(&self, id: Uuid, fp: &str, new_locked_until: DateTime<Utc>) -> Result<bool, sqlx::Error> {
            let mut rows = self.rows.lock().await;
            let Some(row) = rows.get_mut(&id) else { return Ok(false) };
            if row.status != "processing" || row.request_fingerprint != fp {
                return Ok(false);
            }
            row.locked_until = Some(new_locked_until);
            Ok(true)
        }

        async fn mark_succeeded(
            &self,
            id: Uuid,
            response_status: i32,
            response_body: &JsonValue,
            expires_at: DateTime<Utc>,
        ) -> Result<(), sqlx::Error> {
            let mut rows = self.rows.lock().await;
            if let Some(row) = rows.get_mut(&id) {
                row.status = "succeeded".to_string();
                row.response_status = Some(response_status);
                row.response_body = Some(response_body.clone());
                row.expires_at = expires_at;
                row.locked_until = None;
            }
            Ok(())
        }

        async fn mark_failed_retryable(
            &self,
            id: Uuid,
            reason: &str,
            locked_until: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> Result<(), sqlx::Error> {
            let mut rows = self.rows.lock().await;
            if let Some(row) = rows.get_mut(&id) {
                row.status = "failed_retryable".to_string();
                row.error_reason = Some(reason.to_string());
                row.locked_until = Some(locked_until);
                row.expires_at = expires_at;
            }
            Ok(())
        }

        async fn delete_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, sqlx::Error> {
            let mut rows = self.rows.lock().await;
            let expired: Vec<Uuid> = rows.values().filter(|r| r.expires_at <= now).take(limit as usize).map(|r| r.id).collect();
            for id in &expired {
                rows.remove(id);
            }
            Ok(expired.len() as u64)
        }
    }

    fn coordinator(store: FakeStore) -> IdempotencyCoordinator {
        IdempotencyCoordinator::new(store, 30, 3600, 5)
    }

    #[test]
    fn fail_closed_maps_repo_error_to_coordinator_unavailable() {
        let err = GatewayError::Idempotency(IdempotencyError::CoordinatorUnavailable);
        assert_eq!(err.status_and_code().0.as_u16(), 503);
    }

    #[tokio::test]
    async fn fresh_key_takes_ownership() {
        let coord = coordinator(FakeStore::default());
        let outcome = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{}").await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Owner(_)));
    }

    #[tokio::test]
    async fn no_key_bypasses() {
        let coord = coordinator(FakeStore::default());
        let outcome = coord.begin("scope", None, "POST", "/v1/messages", b"{}").await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Bypassed));
    }

    #[tokio::test]
    async fn succeeded_record_replays_its_stored_response() {
        let key_hash = hash_key("key-1");
        let fp = fingerprint("POST", "/v1/messages", b"{}");
        let mut row = seed_row("scope", &key_hash, &fp, "succeeded", None);
        row.response_status = Some(200);
        row.response_body = Some(serde_json::json!({"ok": true}));
        let coord = coordinator(FakeStore::seeded(row));

        let outcome = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{}").await.unwrap();
        match outcome {
            BeginOutcome::Replay { status, body } => {
                assert_eq!(status, 200);
                assert_eq!(body, serde_json::json!({"ok": true}));
            }
            other => panic!("expected Replay, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_rejected() {
        let key_hash = hash_key("key-1");
        let original_fp = fingerprint("POST", "/v1/messages", b"{\"a\":1}");
        let row = seed_row("scope", &key_hash, &original_fp, "succeeded", None);
        let coord = coordinator(FakeStore::seeded(row));

        let err = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{\"a\":2}").await.unwrap_err();
        assert!(matches!(err, GatewayError::Idempotency(IdempotencyError::FingerprintMismatch)));
    }

    #[tokio::test]
    async fn processing_and_not_expired_conflicts() {
        let key_hash = hash_key("key-1");
        let fp = fingerprint("POST", "/v1/messages", b"{}");
        let row = seed_row("scope", &key_hash, &fp, "processing", Some(Utc::now() + ChronoDuration::seconds(30)));
        let coord = coordinator(FakeStore::seeded(row));

        let err = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{}").await.unwrap_err();
        assert!(matches!(err, GatewayError::Idempotency(IdempotencyError::Conflict)));
    }

    #[tokio::test]
    async fn processing_past_its_lock_is_reclaimed() {
        let key_hash = hash_key("key-1");
        let fp = fingerprint("POST", "/v1/messages", b"{}");
        let row = seed_row("scope", &key_hash, &fp, "processing", Some(Utc::now() - ChronoDuration::seconds(5)));
        let coord = coordinator(FakeStore::seeded(row));

        let outcome = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{}").await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Owner(_)));
    }

    #[tokio::test]
    async fn failed_retryable_past_backoff_is_reclaimed() {
        let key_hash = hash_key("key-1");
        let fp = fingerprint("POST", "/v1/messages", b"{}");
        let row = seed_row("scope", &key_hash, &fp, "failed_retryable", Some(Utc::now() - ChronoDuration::seconds(1)));
        let coord = coordinator(FakeStore::seeded(row));

        let outcome = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{}").await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Owner(_)));
    }

    #[tokio::test]
    async fn complete_success_marks_record_succeeded_for_future_replay() {
        let coord = coordinator(FakeStore::default());
        let owner = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{}").await.unwrap();
        let guard = match owner {
            BeginOutcome::Owner(g) => g,
            other => panic!("expected Owner, got {other:?}"),
        };
        coord.complete_success(&guard, 200, &serde_json::json!({"ok": true})).await.unwrap();

        let replay = coord.begin("scope", Some("key-1"), "POST", "/v1/messages", b"{}").await.unwrap();
        assert!(matches!(replay, BeginOutcome::Replay { status: 200, .. }));
    }
}
