//! Ordered capability checks run against one candidate's client
//!
//! The first checks are gates: a candidate that fails any of them is
//! dropped. The remaining checks only record whether a service is reachable.

use crate::proxy::models::{CapabilityFlags, Service};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a probe could not produce an outcome
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("probe cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// A single service probe.
///
/// Implementations are stateless and issue one request through the client,
/// bounded by the client's own timeout.
#[async_trait]
pub trait CapabilityChecker<C>: Send + Sync {
    fn service(&self) -> Service;

    async fn probe(&self, client: &C, cancel: &CancellationToken) -> Result<bool, ProbeError>;
}

/// Outcome of running a [`GateChain`] for one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// A gating check failed; the candidate produces no result
    Rejected(Service),
    Passed(CapabilityFlags),
}

/// Gating checks followed by informational checks, run strictly in order
pub struct GateChain<C> {
    gating: Vec<Arc<dyn CapabilityChecker<C>>>,
    informational: Vec<Arc<dyn CapabilityChecker<C>>>,
}

impl<C: Send + Sync> GateChain<C> {
    pub fn new(
        gating: Vec<Arc<dyn CapabilityChecker<C>>>,
        informational: Vec<Arc<dyn CapabilityChecker<C>>>,
    ) -> Self {
        Self {
            gating,
            informational,
        }
    }

    /// Run every check against `client`.
    ///
    /// Stops at the first gating failure or error. Once gating passes, all
    /// informational checks run; their errors only leave the flag unset.
    pub async fn run(&self, client: &C, cancel: &CancellationToken) -> GateOutcome {
        let mut flags = CapabilityFlags::default();

        for check in &self.gating {
            let service = check.service();
            match check.probe(client, cancel).await {
                Ok(true) => flags.set(service, true),
                Ok(false) => {
                    debug!("gate {} not reachable", service);
                    return GateOutcome::Rejected(service);
                }
                Err(e) => {
                    debug!("gate {} failed: {}", service, e);
                    return GateOutcome::Rejected(service);
                }
            }
        }

        for check in &self.informational {
            let service = check.service();
            let reachable = match check.probe(client, cancel).await {
                Ok(reachable) => reachable,
                Err(e) => {
                    debug!("{} probe failed: {}", service, e);
                    false
                }
            };
            flags.set(service, reachable);
        }

        GateOutcome::Passed(flags)
    }
}

impl<C> Clone for GateChain<C> {
    fn clone(&self) -> Self {
        Self {
            gating: self.gating.clone(),
            informational: self.informational.clone(),
        }
    }
}

impl<C> fmt::Debug for GateChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateChain")
            .field("gating", &self.gating.len())
            .field("informational", &self.informational.len())
            .finish()
    }
}

impl GateChain<Client> {
    /// Cloudflare and Google gates, then OpenAI, YouTube, Netflix and Disney+
    pub fn standard() -> Self {
        let probe = |service| -> Arc<dyn CapabilityChecker<Client>> {
            Arc::new(HttpProbe::for_service(service))
        };
        Self::new(
            Service::GATING.into_iter().map(probe).collect(),
            Service::INFORMATIONAL.into_iter().map(probe).collect(),
        )
    }
}

/// GET a service-specific URL and judge reachability from the status code
#[derive(Debug, Clone)]
pub struct HttpProbe {
    service: Service,
    url: &'static str,
    accept: fn(StatusCode) -> bool,
}

impl HttpProbe {
    pub fn for_service(service: Service) -> Self {
        let (url, accept): (&'static str, fn(StatusCode) -> bool) = match service {
            Service::Cloudflare => ("https://www.cloudflare.com/cdn-cgi/trace", is_success),
            Service::Google => ("https://www.google.com/generate_204", is_no_content),
            Service::Openai => ("https://api.openai.com/v1/models", is_api_served),
            Service::Youtube => ("https://www.youtube.com/premium", is_success),
            Service::Netflix => ("https://www.netflix.com/title/81280792", is_success),
            Service::Disney => ("https://www.disneyplus.com/", is_success),
        };

        Self {
            service,
            url,
            accept,
        }
    }

    pub fn url(&self) -> &str {
        self.url
    }
}

fn is_success(status: StatusCode) -> bool {
    status.is_success()
}

fn is_no_content(status: StatusCode) -> bool {
    status == StatusCode::NO_CONTENT || status == StatusCode::OK
}

/// Unauthenticated calls get 401 where the API is served and 403 where it is blocked
fn is_api_served(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status.is_success()
}

#[async_trait]
impl CapabilityChecker<Client> for HttpProbe {
    fn service(&self) -> Service {
        self.service
    }

    async fn probe(&self, client: &Client, cancel: &CancellationToken) -> Result<bool, ProbeError> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            response = client.get(self.url).send() => response?,
        };

        Ok((self.accept)(response.status()))
    }
}
