//! Background expiry sweep for idempotency records.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::coordinator::IdempotencyCoordinator;

pub fn spawn_sweep(coordinator: Arc<IdempotencyCoordinator>, interval_dur: Duration, batch_limit: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(interval_dur);
        loop {
            tick.tick().await;
            match coordinator.sweep_expired(batch_limit).await {
                Ok(n) if n > 0 => tracing::debug!(deleted = n, "swept expired idempotency records"),
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "idempotency sweep failed"),
            }
        }
    })
}
