//! Upstream Executor: HTTP client factory, per-provider wire
//! adapters, and the account failover loop.

pub mod client_factory;
pub mod failover;
pub mod protocol;
pub mod providers;
pub mod stream;

pub use client_factory::{build_client, ProxyConfig};
pub use failover::{FailoverConfig, FailoverOutcome, FailoverResponse};
pub use protocol::{classify_status, AttemptResult, ProviderAdapter, UpstreamRequest, UpstreamResponse};
pub use stream::{stream_pump, StreamItem, DEFAULT_STREAM_BUFFER};
