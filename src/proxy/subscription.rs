//! Subscription fetching
//!
//! Downloads subscription documents, retrying with a growing delay, and
//! decodes them into raw proxy entries for deduplication.

use crate::proxy::parser::SubscriptionParser;
use crate::Result;
use anyhow::{anyhow, bail};
use reqwest::{Client, StatusCode};
use serde_yaml::Mapping;
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Attempts per subscription before giving up
const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Longest pause between two attempts
const DEFAULT_MAX_BACKOFF_SECS: u64 = 30;

/// Default user agent; several providers only serve proxy lists to known clients
const DEFAULT_USER_AGENT: &str = "clash.meta";

/// Configuration for subscription fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout for each HTTP request
    pub timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Attempts per subscription, at least one
    pub max_attempts: u32,
    /// Cap on the linear backoff between attempts
    pub max_backoff: Duration,
    /// Honour HTTP(S)_PROXY from the environment
    pub use_system_proxy: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
            use_system_proxy: true,
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.use_system_proxy = use_system_proxy;
        self
    }

    /// Pause after the `attempt`-th failure: `attempt` seconds, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt)).min(self.max_backoff)
    }
}

/// Fetcher for subscription documents
#[derive(Debug, Clone)]
pub struct SubscriptionFetcher {
    config: FetcherConfig,
    client: Client,
}

impl SubscriptionFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(FetcherConfig::default())
    }

    pub fn with_config(config: FetcherConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Download one subscription, retrying until it answers 200 OK
    pub async fn fetch_url(&self, url: &str) -> Result<String> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.client.get(url).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    return Ok(response.text().await?);
                }
                Ok(response) => anyhow!("unexpected status {}", response.status()),
                Err(e) => e.into(),
            };

            warn!(
                "fetching {} failed (attempt {}/{}): {}",
                url, attempt, attempts, error
            );
            if attempt >= attempts {
                return Err(error.context(format!("failed to fetch subscription {}", url)));
            }
            tokio::time::sleep(self.config.backoff(attempt)).await;
        }
    }

    /// Fetch and decode every subscription, concatenating their entries in
    /// source order.
    ///
    /// A document that cannot be decoded is skipped. A source that cannot
    /// be downloaded fails the whole fetch, as does ending up with no
    /// entries at all.
    pub async fn fetch_all(&self, urls: &[String]) -> Result<Vec<Mapping>> {
        info!("fetching {} subscriptions", urls.len());
        let mut entries = Vec::new();

        for url in urls {
            let content = self.fetch_url(url).await?;
            match SubscriptionParser::parse_document(&content) {
                Ok(found) => {
                    info!("{} entries from {}", found.len(), url);
                    entries.extend(found);
                }
                Err(e) => warn!("cannot decode subscription {}: {:#}", url, e),
            }
        }

        if entries.is_empty() {
            bail!("no candidates found in subscriptions");
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `body` with `status` to every connection, returning the base URL
    async fn serve(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/sub", addr)
    }

    fn quick_fetcher(max_attempts: u32) -> SubscriptionFetcher {
        SubscriptionFetcher::with_config(
            FetcherConfig::new()
                .with_timeout(Duration::from_secs(2))
                .with_max_attempts(max_attempts)
                .with_max_backoff(Duration::ZERO)
                .with_system_proxy(false),
        )
        .unwrap()
    }

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_user_agent("Custom Agent".to_string())
            .with_max_attempts(3);

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.user_agent, "Custom Agent");
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_backoff_grows_linearly_and_is_capped() {
        let config = FetcherConfig::new().with_max_backoff(Duration::from_secs(5));
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(3), Duration::from_secs(3));
        assert_eq!(config.backoff(20), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fetch_all_decodes_entries() {
        let url = serve(
            "200 OK",
            "proxies:\n  - {name: a, type: ss, server: h1, port: 1}\n  - {name: b, type: ss, server: h2, port: 2}\n",
        )
        .await;

        let entries = quick_fetcher(1).fetch_all(&[url]).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_skips_undecodable_documents() {
        let good = serve("200 OK", "proxies:\n  - {type: ss, server: h, port: 1}\n").await;
        let bad = serve("200 OK", "proxies: [unclosed").await;

        let entries = quick_fetcher(1).fetch_all(&[bad, good]).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_all_without_entries_fails() {
        let url = serve("200 OK", "port: 7890\n").await;
        let err = quick_fetcher(1).fetch_all(&[url]).await.unwrap_err();
        assert!(err.to_string().contains("no candidates"));
    }

    #[tokio::test]
    async fn test_fetch_url_gives_up_after_retries() {
        let url = serve("500 Internal Server Error", "oops").await;
        let err = quick_fetcher(2).fetch_url(&url).await.unwrap_err();
        assert!(format!("{:#}", err).contains("unexpected status"));
    }
}
