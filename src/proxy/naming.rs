//! Geography-derived display names, unique within one run

use crate::proxy::gates::ProbeError;
use crate::proxy::geo::GeoLookup;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Label used when a candidate's location cannot be determined
pub const UNRECOGNIZED_LABEL: &str = "unrecognized";

/// Cloudflare's trace endpoint echoes the caller's address as an `ip=` line
const TRACE_URL: &str = "https://www.cloudflare.com/cdn-cgi/trace";

static TRACE_IP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^ip=(\S+)\s*$").expect("Invalid trace ip regex"));

/// Per-run record of which labels have been handed out
#[derive(Debug, Default)]
pub struct NameRegistry {
    counters: Mutex<HashMap<String, u32>>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a unique name derived from `label`.
    ///
    /// The first claim gets `label` itself, later claims get `label-2`,
    /// `label-3` and so on.
    pub async fn claim(&self, label: &str) -> String {
        let mut counters = self.counters.lock().await;
        match counters.get_mut(label) {
            Some(count) => {
                *count += 1;
                format!("{}-{}", label, count)
            }
            None => {
                counters.insert(label.to_string(), 1);
                label.to_string()
            }
        }
    }

    /// Forget every claimed label
    pub async fn reset(&self) {
        self.counters.lock().await.clear();
    }
}

/// Finds the public address a client's traffic leaves from
#[async_trait]
pub trait IpDiscovery<C>: Send + Sync {
    async fn query(&self, client: &C, cancel: &CancellationToken) -> Result<String, ProbeError>;
}

/// [`IpDiscovery`] through Cloudflare's trace endpoint
#[derive(Debug, Clone, Default)]
pub struct TraceIpDiscovery;

impl TraceIpDiscovery {
    /// Extract the `ip=` value from a trace body
    pub fn parse_trace(body: &str) -> Option<String> {
        TRACE_IP_REGEX
            .captures(body)
            .map(|caps| caps[1].to_string())
    }
}

#[async_trait]
impl IpDiscovery<Client> for TraceIpDiscovery {
    async fn query(&self, client: &Client, cancel: &CancellationToken) -> Result<String, ProbeError> {
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            body = async { client.get(TRACE_URL).send().await?.text().await } => body?,
        };

        Self::parse_trace(&body).ok_or_else(|| ProbeError::Other("no ip in trace".to_string()))
    }
}

/// Resolves and de-collides the display name of a candidate that passed gating
pub struct NameResolver<C> {
    ip_discovery: Arc<dyn IpDiscovery<C>>,
    geo: Arc<dyn GeoLookup>,
}

impl<C: Send + Sync> NameResolver<C> {
    pub fn new(ip_discovery: Arc<dyn IpDiscovery<C>>, geo: Arc<dyn GeoLookup>) -> Self {
        Self { ip_discovery, geo }
    }

    /// Geographic label of the client's exit address, or [`UNRECOGNIZED_LABEL`]
    pub async fn label(&self, client: &C, cancel: &CancellationToken) -> String {
        let ip = match self.ip_discovery.query(client, cancel).await {
            Ok(ip) => ip,
            Err(e) => {
                debug!("ip discovery failed: {}", e);
                String::new()
            }
        };

        let label = if ip.is_empty() {
            String::new()
        } else {
            self.geo.resolve(&ip)
        };

        if label.is_empty() {
            UNRECOGNIZED_LABEL.to_string()
        } else {
            label
        }
    }

    /// Resolve the label and reserve a unique name for it in `registry`
    pub async fn assign(
        &self,
        client: &C,
        registry: &NameRegistry,
        cancel: &CancellationToken,
    ) -> String {
        let label = self.label(client, cancel).await;
        registry.claim(&label).await
    }
}

impl<C> Clone for NameResolver<C> {
    fn clone(&self) -> Self {
        Self {
            ip_discovery: Arc::clone(&self.ip_discovery),
            geo: Arc::clone(&self.geo),
        }
    }
}

impl<C> fmt::Debug for NameResolver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::proxy::gates::tests::{cancel_after, silent_proxy_client, FakeClient};
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    /// Reports a fixed exit address, or fails when none is set
    pub(crate) struct FixedIp(pub Option<&'static str>);

    #[async_trait]
    impl IpDiscovery<FakeClient> for FixedIp {
        async fn query(
            &self,
            _client: &FakeClient,
            _cancel: &CancellationToken,
        ) -> Result<String, ProbeError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| ProbeError::Other("unreachable".to_string()))
        }
    }

    /// Maps every address to one label
    pub(crate) struct FixedGeo(pub &'static str);

    impl GeoLookup for FixedGeo {
        fn resolve(&self, _ip: &str) -> String {
            self.0.to_string()
        }
    }

    fn resolver(ip: Option<&'static str>, geo: &'static str) -> NameResolver<FakeClient> {
        NameResolver::new(Arc::new(FixedIp(ip)), Arc::new(FixedGeo(geo)))
    }

    #[tokio::test]
    async fn test_claim_suffixes_start_at_two() {
        let registry = NameRegistry::new();
        assert_eq!(registry.claim("US").await, "US");
        assert_eq!(registry.claim("US").await, "US-2");
        assert_eq!(registry.claim("JP").await, "JP");
        assert_eq!(registry.claim("US").await, "US-3");
    }

    #[tokio::test]
    async fn test_reset_forgets_labels() {
        let registry = NameRegistry::new();
        registry.claim("US").await;
        registry.reset().await;
        assert_eq!(registry.claim("US").await, "US");
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_unique() {
        let registry = Arc::new(NameRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.claim("X").await }));
        }

        let mut names = HashSet::new();
        for handle in handles {
            names.insert(handle.await.unwrap());
        }

        let expected: HashSet<String> = std::iter::once("X".to_string())
            .chain((2..=50).map(|i| format!("X-{}", i)))
            .collect();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_label_from_geo() {
        let cancel = CancellationToken::new();
        let label = resolver(Some("8.8.8.8"), "US").label(&FakeClient::default(), &cancel).await;
        assert_eq!(label, "US");
    }

    #[tokio::test]
    async fn test_label_falls_back_to_unrecognized() {
        let cancel = CancellationToken::new();
        assert_eq!(
            resolver(Some("8.8.8.8"), "").label(&FakeClient::default(), &cancel).await,
            UNRECOGNIZED_LABEL
        );
        assert_eq!(
            resolver(None, "US").label(&FakeClient::default(), &cancel).await,
            UNRECOGNIZED_LABEL
        );
    }

    #[tokio::test]
    async fn test_assign_uses_registry() {
        let cancel = CancellationToken::new();
        let registry = NameRegistry::new();
        let resolver = resolver(Some("1.1.1.1"), "DE");
        assert_eq!(resolver.assign(&FakeClient::default(), &registry, &cancel).await, "DE");
        assert_eq!(resolver.assign(&FakeClient::default(), &registry, &cancel).await, "DE-2");
    }

    #[tokio::test]
    async fn test_trace_query_stops_when_cancelled() {
        let client = silent_proxy_client().await;
        let cancel = cancel_after(Duration::from_millis(100));

        let started = Instant::now();
        let outcome = TraceIpDiscovery.query(&client, &cancel).await;

        assert!(matches!(outcome, Err(ProbeError::Cancelled)), "{:?}", outcome);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_parse_trace() {
        let body = "fl=123\nh=www.cloudflare.com\nip=203.0.113.7\nts=1700000000\n";
        assert_eq!(
            TraceIpDiscovery::parse_trace(body).as_deref(),
            Some("203.0.113.7")
        );
        assert_eq!(TraceIpDiscovery::parse_trace("fl=1\nh=x\n"), None);
    }
}
