//! Scheduler snapshot: an arena-plus-index read-mostly projection of
//! (accounts, groups, account-group edges), published by atomic pointer swap
//! so readers never hold a lock across an upstream call.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{Account, AccountGroup, Group};

/// Arena-plus-index: accounts live in a flat `Vec`, referenced by index from
/// the group membership map. No cyclic object graph, and every mutation
/// builds a new snapshot rather than aliasing the one readers hold.
#[derive(Debug, Clone, Default)]
pub struct SchedulerSnapshot {
    pub accounts: Vec<Account>,
    account_index: HashMap<Uuid, usize>,
    groups: HashMap<Uuid, Group>,
    /// group_id -> ordered (by AccountGroup.priority ascending) list of account indices.
    group_members: HashMap<Uuid, Vec<(usize, i32)>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_outbox_id: i64,
}

impl SchedulerSnapshot {
    pub fn build(accounts: Vec<Account>, groups: Vec<Group>, edges: Vec<AccountGroup>) -> Self {
        let mut account_index = HashMap::with_capacity(accounts.len());
        for (i, a) in accounts.iter().enumerate() {
            account_index.insert(a.id, i);
        }

        let mut group_members: HashMap<Uuid, Vec<(usize, i32)>> = HashMap::new();
        for edge in &edges {
            if let Some(&idx) = account_index.get(&edge.account_id) {
                group_members.entry(edge.group_id).or_default().push((idx, edge.priority));
            }
        }
        for members in group_members.values_mut() {
            members.sort_by_key(|(_, priority)| *priority);
        }

        Self {
            accounts,
            account_index,
            groups: groups.into_iter().map(|g| (g.id, g)).collect(),
            group_members,
            last_refreshed_at: Some(Utc::now()),
            last_outbox_id: 0,
        }
    }

    pub fn account_by_id(&self, id: Uuid) -> Option<&Account> {
        self.account_index.get(&id).map(|&i| &self.accounts[i])
    }

    pub fn group(&self, id: Uuid) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Ordered (by AccountGroup.priority ascending) candidate accounts for a group.
    pub fn members_of(&self, group_id: Uuid) -> Vec<&Account> {
        self.group_members
            .get(&group_id)
            .map(|members| members.iter().map(|&(idx, _)| &self.accounts[idx]).collect())
            .unwrap_or_default()
    }

    pub fn priority_of(&self, group_id: Uuid, account_id: Uuid) -> Option<i32> {
        self.group_members.get(&group_id)?.iter().find_map(|&(idx, priority)| {
            if self.accounts[idx].id == account_id {
                Some(priority)
            } else {
                None
            }
        })
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold_secs: i64) -> bool {
        match self.last_refreshed_at {
            Some(t) => (now - t).num_seconds() > threshold_secs,
            None => true,
        }
    }

    /// Applies an in-place mutation to one account by rebuilding the arena
    /// entry (snapshot stays internally consistent; callers still publish a
    /// fresh snapshot via pointer swap rather than mutating the shared one).
    pub fn with_account_updated(&self, id: Uuid, f: impl FnOnce(&mut Account)) -> Self {
        let mut next = self.clone();
        if let Some(&idx) = next.account_index.get(&id) {
            f(&mut next.accounts[idx]);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountStatus, AccountType, GroupStatus, Platform, SchedulingState, SubscriptionType};
    use std::collections::HashMap as StdHashMap;

    fn account(priority: i32) -> Account {
        Account {
            id: Uuid::new_v4(),
            name: "a".into(),
            platform: Platform::Anthropic,
            account_type: AccountType::Oauth,
            credentials: StdHashMap::new(),
            extra: StdHashMap::new(),
            proxy_id: None,
            scheduling: SchedulingState { priority, ..Default::default() },
            billing_rate_multiplier: 1.0,
        }
    }

    fn group() -> Group {
        Group {
            id: Uuid::new_v4(),
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
            model_routing: StdHashMap::new(),
            model_routing_enabled: false,
        }
    }

    #[test]
    fn members_are_ordered_by_priority_ascending() {
        let g = group();
        let a1 = account(5);
        let a2 = account(1);
        let edges = vec![
            AccountGroup { account_id: a1.id, group_id: g.id, priority: 5 },
            AccountGroup { account_id: a2.id, group_id: g.id, priority: 1 },
        ];
        let snapshot = SchedulerSnapshot::build(vec![a1.clone(), a2.clone()], vec![g.clone()], edges);
        let members = snapshot.members_of(g.id);
        assert_eq!(members[0].id, a2.id);
        assert_eq!(members[1].id, a1.id);
    }

    #[test]
    fn with_account_updated_does_not_mutate_original() {
        let a = account(1);
        let snapshot = SchedulerSnapshot::build(vec![a.clone()], vec![], vec![]);
        let updated = snapshot.with_account_updated(a.id, |acc| acc.scheduling.schedulable = false);
        assert!(snapshot.account_by_id(a.id).unwrap().scheduling.schedulable);
        assert!(!updated.account_by_id(a.id).unwrap().scheduling.schedulable);
    }
}
