//! Candidate selection: `select_candidates(group_id, platform, model, session_key?)`.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::Cache;
use crate::types::{Account, Platform};

use super::snapshot::SchedulerSnapshot;

const STICKY_TTL_SECS: u64 = 3600;

fn sticky_key(group_id: Uuid, session_key: &str) -> String {
    format!("sticky:{group_id}:{session_key}")
}

/// Sticky-session binding store, backed by the generic cache.
pub struct StickyBindings {
    cache: Arc<dyn Cache>,
}

impl StickyBindings {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn get(&self, group_id: Uuid, session_key: &str) -> Option<Uuid> {
        self.cache
            .get(&sticky_key(group_id, session_key))
            .await
            .ok()
            .flatten()
            .and_then(|s| Uuid::parse_str(&s).ok())
    }

    pub async fn bind(&self, group_id: Uuid, session_key: &str, account_id: Uuid) {
        let _ = self
            .cache
            .set(&sticky_key(group_id, session_key), &account_id.to_string(), std::time::Duration::from_secs(STICKY_TTL_SECS))
            .await;
    }

    pub async fn unbind(&self, group_id: Uuid, session_key: &str) {
        let _ = self.cache.del(&sticky_key(group_id, session_key)).await;
    }
}

fn window_cost_key(account_id: Uuid) -> String {
    format!("window_cost:{account_id}")
}

async fn window_cost_headroom(cache: &Arc<dyn Cache>, account: &Account, reserve: f64) -> bool {
    let Some(limit) = account.window_cost_limit_usd() else {
        return true;
    };
    match cache.get(&window_cost_key(account.id)).await.ok().flatten() {
        // Absence of a cache entry does not count against headroom: keep the
        // binding when the window-cost cache is cold rather than evict it.
        None => true,
        Some(raw) => {
            let spent: f64 = raw.parse().unwrap_or(0.0);
            limit - spent >= reserve
        }
    }
}

fn session_window_closed(account: &Account) -> bool {
    matches!(account.scheduling.session_window_status.as_deref(), Some("closed"))
}

fn credentials_expired(account: &Account) -> bool {
    account
        .extra
        .get("credentials_expire_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(false)
}

fn passes_filter(account: &Account, now: DateTime<Utc>) -> bool {
    if !account.is_selectable(now) {
        return false;
    }
    if session_window_closed(account) {
        return false;
    }
    if account.auto_pause_on_expired() && credentials_expired(account) {
        return false;
    }
    true
}

/// Deterministic per-(account, fingerprint) tiebreak — avoids convoy effects
/// when otherwise-equal candidates would always sort in the same order.
fn tiebreak_hash(account_id: Uuid, fingerprint: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    hasher.update(fingerprint.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

async fn recent_load(cache: &Arc<dyn Cache>, account: &Account, model: &str) -> u64 {
    if account.platform != Platform::Antigravity {
        return 0;
    }
    cache
        .get(&format!("callcount:{}:{}", account.id, model))
        .await
        .ok()
        .flatten()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Produces the ordered candidate list. Never fails: an empty
/// result means "no schedulable account" and is surfaced by the caller.
pub async fn select_candidates(
    snapshot: &SchedulerSnapshot,
    cache: &Arc<dyn Cache>,
    sticky: &StickyBindings,
    group_id: Uuid,
    platform: Platform,
    model: &str,
    session_key: Option<&str>,
    request_fingerprint: &str,
    sticky_reserve_usd: f64,
) -> Vec<Uuid> {
    let now = Utc::now();
    let mut ordered = Vec::new();
    let mut sticky_account_id = None;

    if let Some(session_key) = session_key {
        if let Some(account_id) = sticky.get(group_id, session_key).await {
            match snapshot.account_by_id(account_id) {
                Some(account)
                    if passes_filter(account, now)
                        && window_cost_headroom(cache, account, sticky_reserve_usd).await =>
                {
                    sticky.bind(group_id, session_key, account_id).await;
                    ordered.push(account_id);
                    sticky_account_id = Some(account_id);
                }
                _ => {
                    sticky.unbind(group_id, session_key).await;
                }
            }
        }
    }

    let Some(group) = snapshot.group(group_id) else {
        return ordered;
    };

    let baseline: Vec<&Account> = if group.model_routing_enabled {
        let ids = group
            .model_routing
            .get(model)
            .or_else(|| group.model_routing.get("*"))
            .cloned()
            .unwrap_or_default();
        ids.iter().filter_map(|id| snapshot.account_by_id(*id)).collect()
    } else {
        snapshot.members_of(group_id)
    };

    let mut candidates: Vec<&Account> = baseline
        .into_iter()
        .filter(|a| a.platform == platform)
        .filter(|a| Some(a.id) != sticky_account_id)
        .filter(|a| passes_filter(a, now))
        .collect();

    let mut scored = Vec::with_capacity(candidates.len());
    for account in candidates.drain(..) {
        let priority = snapshot.priority_of(group_id, account.id).unwrap_or(i32::MAX);
        let load = recent_load(cache, account, model).await;
        let last_used = account.scheduling.last_used_at.map(|t| t.timestamp()).unwrap_or(0);
        let tiebreak = tiebreak_hash(account.id, request_fingerprint);
        scored.push((priority, load, last_used, tiebreak, account.id));
    }
    scored.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
            .then(a.3.cmp(&b.3))
    });

    ordered.extend(scored.into_iter().map(|(_, _, _, _, id)| id));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::types::{AccountGroup, AccountStatus, AccountType, Group, GroupStatus, SchedulingState, SubscriptionType};
    use std::collections::HashMap;

    fn account(priority_hint: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            name: priority_hint.into(),
            platform: Platform::Anthropic,
            account_type: AccountType::Oauth,
            credentials: HashMap::new(),
            extra: HashMap::new(),
            proxy_id: None,
            scheduling: SchedulingState::default(),
            billing_rate_multiplier: 1.0,
        }
    }

    fn group(id: Uuid) -> Group {
        Group {
            id,
            platform: Platform::Anthropic,
            status: GroupStatus::Active,
            rate_multiplier: 1.0,
            is_exclusive: false,
            subscription_type: SubscriptionType::PayPerToken,
            daily_limit_usd: None,
            weekly_limit_usd: None,
            monthly_limit_usd: None,
            claude_code_only: false,
            fallback_group_id: None,
            fallback_group_id_on_invalid_request: None,
            model_routing: HashMap::new(),
            model_routing_enabled: false,
        }
    }

    #[tokio::test]
    async fn selection_prefers_lower_priority() {
        let group_id = Uuid::new_v4();
        let mut a1 = account("low");
        a1.scheduling.priority = 5;
        let mut a2 = account("high");
        a2.scheduling.priority = 1;
        let edges = vec![
            AccountGroup { account_id: a1.id, group_id, priority: 5 },
            AccountGroup { account_id: a2.id, group_id, priority: 1 },
        ];
        let snapshot = SchedulerSnapshot::build(vec![a1.clone(), a2.clone()], vec![group(group_id)], edges);
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let sticky = StickyBindings::new(cache.clone());

        let result = select_candidates(&snapshot, &cache, &sticky, group_id, Platform::Anthropic, "m", None, "fp", 0.0).await;
        assert_eq!(result[0], a2.id);
    }

    #[tokio::test]
    async fn filtered_accounts_never_appear() {
        let group_id = Uuid::new_v4();
        let mut a1 = account("overloaded");
        a1.scheduling.overload_until = Some(Utc::now() + chrono::Duration::seconds(60));
        let edges = vec![AccountGroup { account_id: a1.id, group_id, priority: 0 }];
        let snapshot = SchedulerSnapshot::build(vec![a1.clone()], vec![group(group_id)], edges);
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let sticky = StickyBindings::new(cache.clone());

        let result = select_candidates(&snapshot, &cache, &sticky, group_id, Platform::Anthropic, "m", None, "fp", 0.0).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn sticky_binding_is_preferred_first() {
        let group_id = Uuid::new_v4();
        let a1 = account("sticky-target");
        let a2 = account("other");
        let edges = vec![
            AccountGroup { account_id: a1.id, group_id, priority: 5 },
            AccountGroup { account_id: a2.id, group_id, priority: 0 },
        ];
        let snapshot = SchedulerSnapshot::build(vec![a1.clone(), a2.clone()], vec![group(group_id)], edges);
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let sticky = StickyBindings::new(cache.clone());
        sticky.bind(group_id, "s1", a1.id).await;

        let result = select_candidates(&snapshot, &cache, &sticky, group_id, Platform::Anthropic, "m", Some("s1"), "fp", 0.0).await;
        assert_eq!(result[0], a1.id);
    }

    #[tokio::test]
    async fn unavailable_sticky_binding_is_dropped() {
        let group_id = Uuid::new_v4();
        let mut a1 = account("dead-sticky-target");
        a1.scheduling.schedulable = false;
        let a2 = account("fallback");
        let edges = vec![
            AccountGroup { account_id: a1.id, group_id, priority: 0 },
            AccountGroup { account_id: a2.id, group_id, priority: 1 },
        ];
        let snapshot = SchedulerSnapshot::build(vec![a1.clone(), a2.clone()], vec![group(group_id)], edges);
        let cache: Arc<dyn Cache> = InMemoryCache::new();
        let sticky = StickyBindings::new(cache.clone());
        sticky.bind(group_id, "s1", a1.id).await;

        let result = select_candidates(&snapshot, &cache, &sticky, group_id, Platform::Anthropic, "m", Some("s1"), "fp", 0.0).await;
        assert_eq!(result[0], a2.id);
        assert!(sticky.get(group_id, "s1").await.is_none());
    }
}
