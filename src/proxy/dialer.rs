//! Binding network clients through a candidate proxy

use crate::proxy::models::ProxyConfig;
use crate::Result;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::time::Duration;

/// How long an idle connection may linger before it is closed
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces a network client whose traffic goes through one proxy.
///
/// A client is used for a single candidate and then dropped, so
/// implementations must not pool connections across calls.
#[async_trait]
pub trait ProxyDialer: Send + Sync + 'static {
    type Client: Send + Sync + 'static;

    async fn bind(&self, config: &ProxyConfig) -> Result<Self::Client>;

    /// Whether `bind` can handle this protocol kind at all
    fn supports(&self, _kind: &str) -> bool {
        true
    }
}

/// Dialer backed by reqwest's proxy support (HTTP, HTTPS and SOCKS5)
#[derive(Debug, Clone)]
pub struct ReqwestDialer {
    timeout: Duration,
}

impl ReqwestDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Proxy URL scheme for a protocol kind
    fn scheme(kind: &str) -> Option<&'static str> {
        match kind.to_ascii_lowercase().as_str() {
            "http" => Some("http"),
            "https" => Some("https"),
            "socks5" | "socks" => Some("socks5h"),
            _ => None,
        }
    }

    fn proxy_for(config: &ProxyConfig) -> Result<ReqwestProxy> {
        let scheme = Self::scheme(&config.kind)
            .ok_or_else(|| anyhow!("unsupported proxy type: {}", config.kind))?;

        let url = format!("{}://{}", scheme, config.address());
        let proxy = ReqwestProxy::all(&url).with_context(|| format!("invalid proxy url {}", url))?;

        Ok(match (&config.username, &config.password) {
            (Some(user), Some(pass)) => proxy.basic_auth(user, pass),
            _ => proxy,
        })
    }
}

#[async_trait]
impl ProxyDialer for ReqwestDialer {
    type Client = Client;

    async fn bind(&self, config: &ProxyConfig) -> Result<Client> {
        let client = Client::builder()
            .proxy(Self::proxy_for(config)?)
            .timeout(self.timeout)
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
            .build()?;

        Ok(client)
    }

    fn supports(&self, kind: &str) -> bool {
        Self::scheme(kind).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_supported_kinds() {
        let dialer = ReqwestDialer::new(Duration::from_secs(1));
        for kind in ["http", "https", "socks5", "SOCKS5"] {
            let config = ProxyConfig::new(kind, "127.0.0.1", 1080);
            assert!(dialer.bind(&config).await.is_ok(), "{} should bind", kind);
        }
    }

    #[tokio::test]
    async fn test_bind_with_credentials() {
        let dialer = ReqwestDialer::new(Duration::from_secs(1));
        let config = ProxyConfig::new("socks5", "127.0.0.1", 1080).with_auth("user", "pass");
        assert!(dialer.bind(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_unsupported_kind() {
        let dialer = ReqwestDialer::new(Duration::from_secs(1));
        let config = ProxyConfig::new("vmess", "127.0.0.1", 443);
        let err = dialer.bind(&config).await.unwrap_err();
        assert!(err.to_string().contains("unsupported proxy type"));
    }

    #[test]
    fn test_supports() {
        let dialer = ReqwestDialer::new(Duration::from_secs(1));
        assert!(dialer.supports("http"));
        assert!(dialer.supports("Socks5"));
        assert!(!dialer.supports("vmess"));
        assert!(!dialer.supports("ss"));
    }
}
