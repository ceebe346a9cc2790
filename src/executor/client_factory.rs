//! HTTP client factory: one `reqwest::Client` per (account, proxy)
//! combination, built lazily and cached by the caller.
//!
//! ClientHello impersonation would need a low-level TLS dialer reqwest
//! doesn't expose, so it's left unimplemented here: `enable_tls_fingerprint`
//! accounts still get a standard `rustls`-backed client, and are still
//! selectable, only the impersonation behavior is lost.

use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{ProxyKind, ProxyPoolEntry};
use crate::error::{GatewayError, Result};
use crate::types::Account;

#[derive(Debug, Clone)]
pub enum ProxyConfig {
    None,
    Http(String),
    Socks5 { addr: String, username: Option<String>, password: Option<String> },
}

/// Looks up `proxy_id` in the operator-provisioned pool. An id with no
/// matching entry dispatches direct rather than failing the request — a
/// stale proxy assignment shouldn't take an otherwise-healthy account out of
/// rotation.
pub fn resolve_proxy(proxy_id: Option<Uuid>, pool: &HashMap<Uuid, ProxyPoolEntry>) -> ProxyConfig {
    let Some(id) = proxy_id else { return ProxyConfig::None };
    match pool.get(&id) {
        Some(entry) => match entry.kind {
            ProxyKind::Http => ProxyConfig::Http(entry.addr.clone()),
            ProxyKind::Socks5 => {
                ProxyConfig::Socks5 { addr: entry.addr.clone(), username: entry.username.clone(), password: entry.password.clone() }
            }
        },
        None => {
            tracing::warn!(proxy_id = %id, "account references unknown proxy id, dispatching direct");
            ProxyConfig::None
        }
    }
}

pub async fn build_client(account: &Account, proxy: &ProxyConfig, response_header_timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(response_header_timeout);

    builder = match proxy {
        ProxyConfig::None => builder,
        ProxyConfig::Http(url) => {
            let proxy = reqwest::Proxy::all(url).map_err(|e| GatewayError::Config(e.to_string()))?;
            builder.proxy(proxy)
        }
        ProxyConfig::Socks5 { addr, username, password } => {
            probe_socks5(addr).await;
            let mut proxy_url = format!("socks5h://{addr}");
            if let (Some(user), Some(pass)) = (username, password) {
                proxy_url = format!("socks5h://{user}:{pass}@{addr}");
            }
            let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| GatewayError::Config(e.to_string()))?;
            builder.proxy(proxy)
        }
    };

    if account.enable_tls_fingerprint() {
        tracing::debug!(account_id = %account.id, "tls fingerprinting requested but unavailable, falling back to standard TLS");
    }

    builder.build().map_err(|e| GatewayError::Config(e.to_string()))
}

/// Dials the SOCKS5 proxy once before handing it to reqwest, so a dead proxy
/// shows up as a warning against this account rather than an opaque connect
/// error surfacing from deep inside the first real upstream call.
async fn probe_socks5(addr: &str) {
    let probe = tokio::time::timeout(Duration::from_secs(3), tokio_socks::tcp::Socks5Stream::connect(addr, ("1.1.1.1", 443))).await;
    match probe {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(proxy = addr, error = %e, "socks5 proxy did not accept a probe connection"),
        Err(_) => tracing::warn!(proxy = addr, "socks5 proxy probe timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Account, AccountType, Platform, SchedulingState};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn account() -> Account {
        Account {
            id: Uuid::new_v4(),
            name: "a".into(),
            platform: Platform::Anthropic,
            account_type: AccountType::Oauth,
            credentials: HashMap::new(),
            extra: HashMap::new(),
            proxy_id: None,
            scheduling: SchedulingState::default(),
            billing_rate_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn builds_direct_client_without_proxy() {
        let client = build_client(&account(), &ProxyConfig::None, Duration::from_secs(30)).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn builds_client_with_socks5_proxy() {
        let proxy = ProxyConfig::Socks5 { addr: "127.0.0.1:1".into(), username: None, password: None };
        let client = build_client(&account(), &proxy, Duration::from_secs(30)).await;
        assert!(client.is_ok());
    }

    #[test]
    fn resolves_unknown_proxy_id_to_direct() {
        let pool = HashMap::new();
        assert!(matches!(resolve_proxy(Some(Uuid::new_v4()), &pool), ProxyConfig::None));
    }

    #[test]
    fn resolves_known_proxy_id_to_its_kind() {
        let id = Uuid::new_v4();
        let mut pool = HashMap::new();
        pool.insert(
            id,
            ProxyPoolEntry { kind: ProxyKind::Http, addr: "10.0.0.1:8080".into(), username: None, password: None },
        );
        assert!(matches!(resolve_proxy(Some(id), &pool), ProxyConfig::Http(addr) if addr == "10.0.0.1:8080"));
    }
}
