//! Concurrent validation of a batch of proxy candidates

use crate::error::CheckError;
use crate::proxy::counters::{ProgressSnapshot, RunCounters};
use crate::proxy::dialer::{ProxyDialer, ReqwestDialer};
use crate::proxy::gates::{GateChain, GateOutcome};
use crate::proxy::geo::{GeoLocator, GeoLookup, NoGeoLookup};
use crate::proxy::models::{CheckResult, ProxyConfig};
use crate::proxy::naming::{NameRegistry, NameResolver, TraceIpDiscovery};
use crate::tui::ProgressReporter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default timeout for each request made through a candidate, in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default number of concurrent workers
const DEFAULT_CONCURRENCY: usize = 20;

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout for each request made through a candidate
    pub timeout: Duration,
    /// Upper bound on concurrent workers
    pub concurrency: usize,
    /// Draw a progress line on stderr while running
    pub print_progress: bool,
    /// Path to MMDB file for geolocation (optional)
    pub mmdb_path: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            concurrency: DEFAULT_CONCURRENCY,
            print_progress: false,
            mmdb_path: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_progress(mut self, print_progress: bool) -> Self {
        self.print_progress = print_progress;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }

    /// Workers to start for `candidates` candidates, at least one
    pub fn worker_count(&self, candidates: usize) -> usize {
        self.concurrency.max(1).min(candidates.max(1))
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Candidates that passed gating, in completion order
    pub results: Vec<CheckResult>,
    /// Final counter values
    pub progress: ProgressSnapshot,
    /// Candidates whose protocol the dialer cannot bind
    pub unsupported: usize,
}

/// Proxy checker driving a pool of workers over a candidate list
pub struct ProxyChecker<D: ProxyDialer> {
    config: CheckerConfig,
    dialer: Arc<D>,
    gates: GateChain<D::Client>,
    names: NameResolver<D::Client>,
}

impl ProxyChecker<ReqwestDialer> {
    /// Checker using reqwest clients, the standard service probes and,
    /// when `mmdb_path` is set and readable, MMDB geolocation
    pub fn with_config(config: CheckerConfig) -> Self {
        let geo: Arc<dyn GeoLookup> = match config.mmdb_path.as_ref() {
            Some(path) => match GeoLocator::from_path(path) {
                Ok(locator) => Arc::new(locator),
                Err(e) => {
                    warn!("cannot open geo database {}: {}", path, e);
                    Arc::new(NoGeoLookup)
                }
            },
            None => Arc::new(NoGeoLookup),
        };

        let dialer = ReqwestDialer::new(config.timeout);
        let names = NameResolver::<reqwest::Client>::new(Arc::new(TraceIpDiscovery), geo);
        Self::new(config, dialer, GateChain::standard(), names)
    }
}

impl<D: ProxyDialer> ProxyChecker<D> {
    pub fn new(
        config: CheckerConfig,
        dialer: D,
        gates: GateChain<D::Client>,
        names: NameResolver<D::Client>,
    ) -> Self {
        Self {
            config,
            dialer: Arc::new(dialer),
            gates,
            names,
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check every candidate and collect the ones that pass gating
    pub async fn run(&self, candidates: Vec<ProxyConfig>) -> Result<RunReport, CheckError> {
        self.run_with_cancel(candidates, CancellationToken::new())
            .await
    }

    /// Like [`ProxyChecker::run`], stopping early once `cancel` fires.
    ///
    /// Workers finish or abandon their current candidate and take no new
    /// ones; results gathered so far are still returned.
    pub async fn run_with_cancel(
        &self,
        candidates: Vec<ProxyConfig>,
        cancel: CancellationToken,
    ) -> Result<RunReport, CheckError> {
        if candidates.is_empty() {
            return Err(CheckError::NoCandidates);
        }

        let total = candidates.len();
        let workers = self.config.worker_count(total);
        info!("checking {} candidates with {} workers", total, workers);

        let unsupported = candidates
            .iter()
            .filter(|c| !self.dialer.supports(&c.kind))
            .count();
        if unsupported > 0 {
            info!(
                "{} of {} candidates use a protocol this dialer cannot bind and will be skipped",
                unsupported, total
            );
        }

        let counters = Arc::new(RunCounters::new(total));
        let registry = Arc::new(NameRegistry::new());

        let (task_tx, task_rx) = mpsc::channel(total);
        for candidate in candidates {
            // Sized to hold every candidate, so this never waits
            if task_tx.send(candidate).await.is_err() {
                break;
            }
        }
        drop(task_tx);

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(async move {
            let mut results = Vec::new();
            while let Some(result) = result_rx.recv().await {
                results.push(result);
            }
            results
        });

        let reporter = self
            .config
            .print_progress
            .then(|| ProgressReporter::spawn(Arc::clone(&counters)));

        let worker = Arc::new(Worker {
            dialer: Arc::clone(&self.dialer),
            gates: self.gates.clone(),
            names: self.names.clone(),
            counters: Arc::clone(&counters),
            registry,
            tasks: Mutex::new(task_rx),
            results: result_tx,
            cancel,
        });

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let worker = Arc::clone(&worker);
            pool.spawn(async move { worker.work().await });
        }
        drop(worker);

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("worker ended abnormally: {}", e);
            }
        }

        let results = collector.await?;

        if let Some(reporter) = reporter {
            reporter.stop().await;
        }

        let progress = counters.snapshot();
        info!(
            "{} of {} candidates available ({} attempted)",
            progress.available, progress.total, progress.attempted
        );

        Ok(RunReport {
            results,
            progress,
            unsupported,
        })
    }
}

impl<D: ProxyDialer> std::fmt::Debug for ProxyChecker<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyChecker")
            .field("config", &self.config)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

/// State shared by the workers of one run
struct Worker<D: ProxyDialer> {
    dialer: Arc<D>,
    gates: GateChain<D::Client>,
    names: NameResolver<D::Client>,
    counters: Arc<RunCounters>,
    registry: Arc<NameRegistry>,
    tasks: Mutex<mpsc::Receiver<ProxyConfig>>,
    results: mpsc::UnboundedSender<CheckResult>,
    cancel: CancellationToken,
}

impl<D: ProxyDialer> Worker<D> {
    /// Take candidates one at a time until the queue is drained
    async fn work(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let next = self.tasks.lock().await.recv().await;
            let Some(proxy) = next else {
                break;
            };

            if let Some(result) = self.check(proxy).await {
                if self.results.send(result).is_err() {
                    break;
                }
            }
        }
    }

    async fn check(&self, mut proxy: ProxyConfig) -> Option<CheckResult> {
        let client = match self.dialer.bind(&proxy).await {
            Ok(client) => client,
            Err(e) => {
                debug!("skipping {}: {}", proxy, e);
                return None;
            }
        };

        self.counters.record_attempt();

        let flags = match self.gates.run(&client, &self.cancel).await {
            GateOutcome::Passed(flags) => flags,
            GateOutcome::Rejected(service) => {
                debug!("dropping {}: {} unreachable", proxy, service);
                return None;
            }
        };

        proxy.name = self.names.assign(&client, &self.registry, &self.cancel).await;

        // Flags and name resolved under cancellation are incomplete
        if self.cancel.is_cancelled() {
            debug!("dropping {}: run cancelled", proxy);
            return None;
        }

        self.counters.record_available();

        Some(CheckResult::new(proxy, flags))
    }
}
