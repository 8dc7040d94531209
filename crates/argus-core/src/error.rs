//! Errors raised by domains, trace checkers, the abstractor and the refiner.

use crate::trace::TraceFingerprint;
use std::time::Duration;
use thiserror::Error;

/// A resource budget that ran out before a verdict was reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Exhaustion {
    #[error("node limit of {limit} reached")]
    Nodes { limit: usize },

    #[error("time limit of {limit_secs}s reached")]
    Time { limit_secs: u64 },

    #[error("memory limit of {limit_mb} MB reached ({used_mb} MB in use)")]
    Memory { limit_mb: usize, used_mb: usize },

    #[error("iteration limit of {limit} reached")]
    Iterations { limit: usize },
}

/// Failure of a collaborator or of the engine itself.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The domain broke its contract (non-reflexive order, successors of bottom, weakened precision).
    #[error("domain contract violated: {0}")]
    Domain(String),

    #[error("solver error: {0}")]
    Solver(String),

    #[error("solver timed out after {0:?}")]
    Timeout(Duration),

    #[error(
        "refinement diverged: counterexample {fingerprint} was refuted again without changing the precision"
    )]
    RefinementDivergence { fingerprint: TraceFingerprint },

    #[error("resource budget exhausted: {0}")]
    ResourceExhausted(#[from] Exhaustion),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
