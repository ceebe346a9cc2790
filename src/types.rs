//! Core domain types for the dispatch core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// Upstream provider namespace an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Anthropic,
    OpenAi,
    Gemini,
    Antigravity,
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Platform::Anthropic),
            "openai" => Ok(Platform::OpenAi),
            "gemini" => Ok(Platform::Gemini),
            "antigravity" => Ok(Platform::Antigravity),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Platform::Anthropic => "anthropic",
            Platform::OpenAi => "openai",
            Platform::Gemini => "gemini",
            Platform::Antigravity => "antigravity",
        };
        write!(f, "{s}")
    }
}

/// How an account authenticates against its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Oauth,
    ApiKey,
    SetupToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Error,
    Disabled,
}

/// Scheduling-relevant fields, mutated by the scheduler on failure classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingState {
    pub concurrency_cap: u32,
    pub priority: i32,
    pub schedulable: bool,
    pub status: AccountStatus,
    pub rate_limited_at: Option<DateTime<Utc>>,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    pub overload_until: Option<DateTime<Utc>>,
    pub temp_unschedulable_until: Option<DateTime<Utc>>,
    pub temp_unschedulable_reason: Option<String>,
    pub session_window_start: Option<DateTime<Utc>>,
    pub session_window_end: Option<DateTime<Utc>>,
    pub session_window_status: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Default for SchedulingState {
    fn default() -> Self {
        Self {
            concurrency_cap: 1,
            priority: 0,
            schedulable: true,
            status: AccountStatus::Active,
            rate_limited_at: None,
            rate_limit_reset_at: None,
            overload_until: None,
            temp_unschedulable_until: None,
            temp_unschedulable_reason: None,
            session_window_start: None,
            session_window_end: None,
            session_window_status: None,
            last_used_at: None,
        }
    }
}

/// One upstream credential + routing metadata: a logical quota bucket at a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub platform: Platform,
    pub account_type: AccountType,
    /// Opaque credential map (api keys, oauth tokens, setup tokens).
    #[serde(skip_serializing)]
    pub credentials: HashMap<String, String>,
    /// Opaque extra map: window-cost limits, tls-fingerprint flag, session-id masking, etc.
    pub extra: HashMap<String, serde_json::Value>,
    pub proxy_id: Option<Uuid>,
    pub scheduling: SchedulingState,
    pub billing_rate_multiplier: f64,
}

impl Account {
    /// `schedulable=true ∧ status=active ∧ (overload_until ≤ now) ∧ (temp_unschedulable_until ≤ now)`
    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        self.scheduling.schedulable
            && self.scheduling.status == AccountStatus::Active
            && self.scheduling.overload_until.map(|t| t <= now).unwrap_or(true)
            && self.scheduling.temp_unschedulable_until.map(|t| t <= now).unwrap_or(true)
            && self.scheduling.rate_limit_reset_at.map(|t| t <= now).unwrap_or(true)
    }

    pub fn enable_tls_fingerprint(&self) -> bool {
        self.extra
            .get("enable_tls_fingerprint")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn window_cost_limit_usd(&self) -> Option<f64> {
        self.extra.get("window_cost_limit_usd").and_then(|v| v.as_f64())
    }

    pub fn auto_pause_on_expired(&self) -> bool {
        self.extra
            .get("auto_pause_on_expired")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    PayPerToken,
    Standard,
}

/// Admin-defined routing container mapping an API key (or user+model) to a
/// prioritized list of accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub platform: Platform,
    pub status: GroupStatus,
    pub rate_multiplier: f64,
    pub is_exclusive: bool,
    pub subscription_type: SubscriptionType,
    pub daily_limit_usd: Option<f64>,
    pub weekly_limit_usd: Option<f64>,
    pub monthly_limit_usd: Option<f64>,
    pub claude_code_only: bool,
    pub fallback_group_id: Option<Uuid>,
    pub fallback_group_id_on_invalid_request: Option<Uuid>,
    /// model -> ordered account-id list ("*" is the wildcard fallback route).
    pub model_routing: HashMap<String, Vec<Uuid>>,
    pub model_routing_enabled: bool,
}

/// Many-to-many edge between Account and Group, carrying the within-group priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountGroup {
    pub account_id: Uuid,
    pub group_id: Uuid,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Disabled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub key: String,
    pub group_id: Option<Uuid>,
    pub status: ApiKeyStatus,
    pub ip_whitelist: Vec<String>,
    pub ip_blacklist: Vec<String>,
    /// 0 means unlimited.
    pub quota: f64,
    pub quota_used: f64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn has_quota_headroom(&self) -> bool {
        self.quota == 0.0 || self.quota_used < self.quota
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub role: UserRole,
    pub status: UserStatus,
    pub balance: f64,
    pub concurrency_cap: u32,
    pub token_version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub group_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub daily_window_start: Option<DateTime<Utc>>,
    pub weekly_window_start: Option<DateTime<Utc>>,
    pub monthly_window_start: Option<DateTime<Utc>>,
    pub daily_usage_usd: f64,
    pub weekly_usage_usd: f64,
    pub monthly_usage_usd: f64,
    /// Incremented on window reset, used for optimistic cache reconciliation.
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Succeeded,
    FailedRetryable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub scope: String,
    pub idempotency_key_hash: String,
    pub request_fingerprint: String,
    pub status: IdempotencyStatus,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub error_reason: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    PayPerToken,
    Subscription,
}

/// Append-only record of a completed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: Uuid,
    pub request_id: String,
    pub user_id: Uuid,
    pub api_key_id: Uuid,
    pub account_id: Uuid,
    pub group_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_tokens: i64,
    pub cache_read_tokens: i64,
    pub cost_usd: f64,
    pub rate_multiplier: f64,
    pub account_rate_multiplier: Option<f64>,
    pub billing_type: BillingType,
    pub stream: bool,
    pub duration_ms: i64,
    pub first_token_ms: Option<i64>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A scheduling-state mutation appended for cross-process causal propagation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub account_id: Uuid,
    pub kind: OutboxEventKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventKind {
    StatusChanged,
    SchedulableChanged,
    RateLimitChanged,
    OverloadChanged,
    LastUsedChanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_account() -> Account {
        Account {
            id: Uuid::new_v4(),
            name: "test".into(),
            platform: Platform::Anthropic,
            account_type: AccountType::Oauth,
            credentials: HashMap::new(),
            extra: HashMap::new(),
            proxy_id: None,
            scheduling: SchedulingState::default(),
            billing_rate_multiplier: 1.0,
        }
    }

    #[test]
    fn selectable_by_default() {
        let acc = base_account();
        assert!(acc.is_selectable(Utc::now()));
    }

    #[test]
    fn not_selectable_when_overloaded() {
        let mut acc = base_account();
        acc.scheduling.overload_until = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!acc.is_selectable(Utc::now()));
    }

    #[test]
    fn not_selectable_when_disabled() {
        let mut acc = base_account();
        acc.scheduling.schedulable = false;
        assert!(!acc.is_selectable(Utc::now()));
    }

    #[test]
    fn platform_round_trips_through_str() {
        for p in ["anthropic", "openai", "gemini", "antigravity"] {
            let parsed: Platform = p.parse().unwrap();
            assert_eq!(parsed.to_string(), p);
        }
    }

    #[test]
    fn unlimited_quota_has_headroom_regardless_of_usage() {
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            key: "k".into(),
            group_id: None,
            status: ApiKeyStatus::Active,
            ip_whitelist: vec![],
            ip_blacklist: vec![],
            quota: 0.0,
            quota_used: 999.0,
            expires_at: None,
        };
        assert!(key.has_quota_headroom());
    }
}
