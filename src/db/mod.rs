//! PostgreSQL persistence: the relational side of the account, group, API
//! key, user, subscription, idempotency and usage-log repositories.

pub mod accounts;
pub mod api_keys;
pub mod groups;
pub mod idempotency;
pub mod outbox;
pub mod pool;
pub mod subscriptions;
pub mod usage_logs;
pub mod users;

pub use accounts::AccountRepository;
pub use api_keys::ApiKeyRepository;
pub use groups::GroupRepository;
pub use idempotency::{IdempotencyRepository, IdempotencyStore};
pub use outbox::OutboxRepository;
pub use pool::DbPool;
pub use subscriptions::SubscriptionRepository;
pub use usage_logs::UsageLogRepository;
pub use users::UserRepository;
