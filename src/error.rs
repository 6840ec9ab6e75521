//! Error types surfaced by a check run

use thiserror::Error;

/// Errors that abort a whole run
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("no usable candidates")]
    NoCandidates,
    #[error("result collector failed: {0}")]
    Collector(#[from] tokio::task::JoinError),
}
