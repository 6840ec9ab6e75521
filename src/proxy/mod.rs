//! Proxy module for validating subscription candidates
//!
//! This module provides functionality for:
//! - Fetching and decoding subscription documents
//! - Deduplicating candidates by network identity
//! - Checking candidates against gating and informational service probes
//!   with a bounded worker pool
//! - Naming passing candidates after their exit country

pub mod checker;
pub mod counters;
pub mod dedup;
pub mod dialer;
pub mod gates;
pub mod geo;
pub mod models;
pub mod naming;
pub mod parser;
pub mod subscription;

pub use checker::{CheckerConfig, ProxyChecker, RunReport};
pub use counters::{ProgressSnapshot, RunCounters};
pub use dedup::{dedup, dedup_raw};
pub use dialer::{ProxyDialer, ReqwestDialer};
pub use gates::{CapabilityChecker, GateChain, GateOutcome, HttpProbe, ProbeError};
pub use geo::{GeoLocator, GeoLookup, NoGeoLookup};
pub use models::{CapabilityFlags, CheckResult, ConfigFieldError, Fingerprint, ProxyConfig, Service};
pub use naming::{IpDiscovery, NameRegistry, NameResolver, TraceIpDiscovery, UNRECOGNIZED_LABEL};
pub use parser::SubscriptionParser;
pub use subscription::{FetcherConfig, SubscriptionFetcher};
