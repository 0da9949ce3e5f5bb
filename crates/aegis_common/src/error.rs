//! Error taxonomy shared by the engine, the transports and the CLI.

use thiserror::Error;

/// Failure of a single backend call (model completion or web search).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Network or provider outage, non-success HTTP status, broken stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider-specific throttling signal (HTTP 429 and friends).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The per-query deadline elapsed before the backend answered.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Missing credentials or an endpoint that was never configured.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Whether this failure means the backend cannot be used at all
    /// (as opposed to a transient outage).
    pub fn is_configuration(&self) -> bool {
        matches!(self, BackendError::Configuration(_))
    }
}

/// Both links of a two-element fallback chain failed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("backend '{primary}' failed ({primary_error}); fallback '{fallback}' failed ({fallback_error})")]
pub struct CompoundFailure {
    pub primary: String,
    pub fallback: String,
    pub primary_error: BackendError,
    pub fallback_error: BackendError,
}

/// Answer generation failed because at least one fallback chain was exhausted.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("generation failed for backend(s) {}", chain_names(.failures))]
pub struct GenerationError {
    pub failures: Vec<CompoundFailure>,
}

impl GenerationError {
    /// Every backend identifier involved in the failure, primaries first.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.failures.iter().map(|f| f.primary.clone()).collect();
        for failure in &self.failures {
            if !names.contains(&failure.fallback) {
                names.push(failure.fallback.clone());
            }
        }
        names
    }
}

/// `primary -> fallback` per exhausted chain.
fn chain_names(failures: &[CompoundFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} -> {}", f.primary, f.fallback))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Judge output that does not follow the expected line grammar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty response")]
    Empty,

    #[error("expected '{expected}' line, found '{found}'")]
    UnexpectedLabel { expected: String, found: String },

    #[error("missing '{0}' line")]
    MissingLine(String),

    #[error("invalid score '{0}'")]
    InvalidScore(String),

    #[error("malformed line: '{0}'")]
    MalformedLine(String),
}

/// Configuration that fails validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("consensus needs 2 or 3 primary backends, got {0}")]
    PrimaryCount(usize),

    #[error("similarity threshold must be within [0, 1], got {0}")]
    Threshold(f64),

    #[error("backend '{name}': {reason}")]
    Backend { name: String, reason: String },

    #[error("backend '{backend}' references unknown endpoint '{endpoint}'")]
    UnknownEndpoint { backend: String, endpoint: String },
}
