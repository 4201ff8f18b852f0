//! Error taxonomy shared across the orchestration core.
//!
//! Every fallible operation in the crate returns [`MeshError`], a lightweight
//! `{kind, message}` pair. The [`ErrorKind`] tags are **stable**: they are the
//! contract between the core and whatever transport wraps it, and they are the
//! values recorded into interaction metrics and emitted on terminal realtime
//! events, so the same tag reaches the caller, the metrics store, and every
//! subscriber.
//!
//! # Propagation policy
//!
//! Sub-operation failures (one scrape, one agent, one metrics write) are
//! caught where they happen, recorded, and folded into a partial result.
//! Only errors fatal to the whole execution — [`ErrorKind::InvalidInput`],
//! [`ErrorKind::NoAgentsAvailable`], [`ErrorKind::Internal`] — surface to the
//! caller as the sole outcome.
//!
//! # Example
//!
//! ```rust
//! use agentmesh::{ErrorKind, MeshError};
//!
//! let err = MeshError::new(ErrorKind::Timeout, "vector search exceeded 5s");
//! assert_eq!(err.kind, ErrorKind::Timeout);
//! assert_eq!(err.kind.as_str(), "timeout");
//! assert!(err.kind.is_retriable());
//! ```

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Stable error tags surfaced at the edge as `errorKind` strings.
///
/// The serialized form is `snake_case`, matching [`ErrorKind::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request failed validation (empty query, malformed id).
    InvalidInput,
    /// Session, agent, or resource missing.
    NotFound,
    /// Routing produced zero candidate agents.
    NoAgentsAvailable,
    /// All knowledge sources failed. Non-fatal; the coordinator may still
    /// answer without citations.
    KnowledgeUnavailable,
    /// An LLM, vector, or scraper backend returned a non-retriable error.
    ProviderError,
    /// Provider backpressure. Always retriable.
    RateLimited,
    /// A per-call or overall budget was exceeded.
    Timeout,
    /// Connection-pool acquisition timed out.
    PoolExhausted,
    /// Client or upstream cancellation.
    Cancelled,
    /// Some agents or sources failed but a response was still produced.
    PartialFailure,
    /// Invariant violation inside the core. Logged with context.
    Internal,
}

impl ErrorKind {
    /// The stable string tag for this kind, as encoded at the edge.
    ///
    /// # Example
    ///
    /// ```rust
    /// use agentmesh::ErrorKind;
    ///
    /// assert_eq!(ErrorKind::NoAgentsAvailable.as_str(), "no_agents_available");
    /// assert_eq!(ErrorKind::PoolExhausted.as_str(), "pool_exhausted");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NoAgentsAvailable => "no_agents_available",
            ErrorKind::KnowledgeUnavailable => "knowledge_unavailable",
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a single retry (with jittered backoff) is permitted for an
    /// idempotent outbound call that failed with this kind.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Timeout)
    }

    /// Whether this kind is fatal to an entire execution, i.e. must surface to
    /// the caller as the sole outcome instead of degrading to a partial result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidInput | ErrorKind::NoAgentsAvailable | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The crate-wide error type: a stable [`ErrorKind`] plus a human message.
///
/// # Example
///
/// ```rust
/// use agentmesh::{ErrorKind, MeshError};
///
/// let err = MeshError::invalid_input("query must not be empty");
/// assert_eq!(err.to_string(), "invalid_input: query must not be empty");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshError {
    /// Stable tag consumed by the transport edge, metrics, and the tracker.
    pub kind: ErrorKind,
    /// Human-readable context. Never parsed; safe to change between versions.
    pub message: String,
}

impl MeshError {
    /// Create an error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorKind::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    /// Shorthand for [`ErrorKind::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for [`ErrorKind::ProviderError`].
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    /// Shorthand for [`ErrorKind::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Shorthand for [`ErrorKind::Cancelled`].
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Shorthand for [`ErrorKind::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl Error for MeshError {}
