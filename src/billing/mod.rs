//! Billing & Subscription Enforcer: pre-flight admission,
//! post-flight cost accounting, and the cache-aside subscription read path.

pub mod cache;
pub mod enforcer;
pub mod pricing;
pub mod windows;

pub use cache::SubscriptionCache;
pub use enforcer::BillingEnforcer;
pub use pricing::{compute_cost, ModelPrice, PriceTable, TokenUsage};
pub use windows::Window;
