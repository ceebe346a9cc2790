//! Snapshot refresh: full rebuild on an interval, plus an outbox poller that
//! applies causally-ordered deltas between rebuilds.

use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::db::{AccountRepository, GroupRepository, OutboxRepository};
use crate::types::{AccountGroup, OutboxEventKind};

use super::snapshot::SchedulerSnapshot;

/// Process-wide singleton holding the current snapshot plus the repos needed
/// to refresh it. Constructed once at startup and handed around as an `Arc`
/// rather than reached for through a global.
pub struct Scheduler {
    pub snapshot: ArcSwap<SchedulerSnapshot>,
    accounts: AccountRepository,
    groups: GroupRepository,
    outbox: OutboxRepository,
    full_rebuild_interval: Duration,
    outbox_poll_interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        accounts: AccountRepository,
        groups: GroupRepository,
        outbox: OutboxRepository,
        full_rebuild_interval: Duration,
        outbox_poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            snapshot: ArcSwap::from_pointee(SchedulerSnapshot::default()),
            accounts,
            groups,
            outbox,
            full_rebuild_interval,
            outbox_poll_interval,
            shutdown: CancellationToken::new(),
        })
    }

    /// Account-group edges are not materialized by a dedicated repo here;
    /// `list_by_group` already joins them, so the full rebuild derives edges
    /// implicitly via per-group membership queries keyed by each group's id.
    pub async fn full_rebuild(&self) -> Result<(), sqlx::Error> {
        let account_rows = self.accounts.list_all().await?;
        let accounts: Vec<_> = account_rows.into_iter().filter_map(|r| r.into_account()).collect();

        let group_rows = self.groups.list_all().await?;
        let mut groups = Vec::with_capacity(group_rows.len());
        let mut edges = Vec::new();
        for row in group_rows {
            let group_id = row.id;
            if let Some(group) = row.into_group() {
                let members = self.accounts.list_by_group(group_id).await?;
                for (priority, member) in members.iter().enumerate() {
                    edges.push(AccountGroup {
                        account_id: member.id,
                        group_id,
                        priority: priority as i32,
                    });
                }
                groups.push(group);
            }
        }

        let next = SchedulerSnapshot::build(accounts, groups, edges);
        self.snapshot.store(Arc::new(next));
        Ok(())
    }

    /// Drains outbox events after the snapshot's watermark and applies them
    /// as deltas, without a full rebuild.
    pub async fn apply_outbox(&self, batch_limit: i64) -> Result<usize, sqlx::Error> {
        let current = self.snapshot.load();
        let events = self.outbox.poll_after(current.last_outbox_id, batch_limit).await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut next = (**current).clone();
        let mut applied = 0;
        for row in &events {
            next.last_outbox_id = next.last_outbox_id.max(row.id);
            let Some(event) = row.clone().into_event() else { continue };
            if let Some(fresh_row) = self.accounts.get_by_id(event.account_id).await? {
                if let Some(fresh) = fresh_row.into_account() {
                    next = next.with_account_updated(event.account_id, |acc| *acc = fresh);
                    applied += 1;
                    match event.kind {
                        OutboxEventKind::StatusChanged
                        | OutboxEventKind::SchedulableChanged
                        | OutboxEventKind::RateLimitChanged
                        | OutboxEventKind::OverloadChanged
                        | OutboxEventKind::LastUsedChanged => {}
                    }
                }
            }
        }
        next.last_refreshed_at = Some(Utc::now());
        self.snapshot.store(Arc::new(next));
        Ok(applied)
    }

    pub fn is_stale(&self, threshold_secs: i64) -> bool {
        self.snapshot.load().is_stale(Utc::now(), threshold_secs)
    }

    /// Publishes a single fresh account row into the live snapshot without
    /// waiting for the next outbox poll or full rebuild. Used by the
    /// rate-limit marker applier so a just-classified failure is reflected
    /// in the very next candidate selection.
    pub fn apply_account_update(&self, account: crate::types::Account) {
        let current = self.snapshot.load();
        let next = current.with_account_updated(account.id, |acc| *acc = account);
        self.snapshot.store(Arc::new(next));
    }

    /// Spawns the background refresh loops. Returns immediately; the loop
    /// exits as soon as `stop` is called (or called again after a prior
    /// `stop`, which is a no-op) rather than running until process exit.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(err) = scheduler.full_rebuild().await {
                tracing::warn!(error = %err, "initial scheduler snapshot rebuild failed");
            }

            let mut rebuild_tick = interval(scheduler.full_rebuild_interval);
            let mut outbox_tick = interval(scheduler.outbox_poll_interval);
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.cancelled() => {
                        tracing::info!("scheduler refresh loop stopping");
                        break;
                    }
                    _ = rebuild_tick.tick() => {
                        if let Err(err) = scheduler.full_rebuild().await {
                            tracing::warn!(error = %err, "scheduler full rebuild failed");
                        }
                    }
                    _ = outbox_tick.tick() => {
                        match scheduler.apply_outbox(500).await {
                            Ok(n) if n > 0 => tracing::debug!(applied = n, "applied outbox deltas"),
                            Ok(_) => {}
                            Err(err) => tracing::warn!(error = %err, "outbox poll failed"),
                        }
                    }
                }
            }
        })
    }

    /// Idempotent: cancelling an already-cancelled token is a no-op, so this
    /// is safe to call more than once (e.g. from both a signal handler and
    /// test teardown).
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
