//! Configuration for the orchestration core.
//!
//! Provides the [`MeshConfig`] struct holding every tunable budget and
//! default. Users construct this manually — no file parsing dependencies
//! are required.
//!
//! # Example
//!
//! ```rust
//! use agentmesh::MeshConfig;
//! use std::time::Duration;
//!
//! // Use the defaults
//! let config = MeshConfig::default();
//! assert_eq!(config.max_parallel_agents, 3);
//!
//! // Or tune individual budgets
//! let config = MeshConfig {
//!     execution_timeout: Duration::from_secs(300),
//!     ..MeshConfig::default()
//! };
//! ```

use std::time::Duration;

/// Budgets and defaults for every component in the core.
///
/// This struct is intentionally plain and users construct it however they
/// want. No TOML, YAML, or other config-file parsing dependencies are
/// introduced.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Wall-clock budget for one whole execution. Default: 120 s.
    pub execution_timeout: Duration,
    /// Wall-clock budget for a single agent step. Default: 60 s.
    pub agent_timeout: Duration,
    /// Budget for one LLM capability call. Default: 30 s.
    pub call_timeout: Duration,
    /// Budget for one vector search. Default: 5 s.
    pub vector_timeout: Duration,
    /// Budget for one page scrape. Default: 15 s.
    pub scrape_timeout: Duration,
    /// Connection-pool acquisition budget; exceeding it maps to
    /// `pool_exhausted`. Default: 3 s.
    pub pool_acquire_timeout: Duration,
    /// Grace period for cooperative cancellation before the coordinator
    /// reports `cancel_timeout`. Default: 2 s.
    pub cancel_grace: Duration,

    /// Upper bound on agents executed concurrently in one session. Default: 3.
    pub max_parallel_agents: usize,
    /// Output-token ceiling per capability call. Default: 4096.
    pub max_tokens_out: usize,
    /// Jitter window for the single idempotent-call retry. Default: 250 ms.
    pub retry_jitter_ms: u64,

    /// Messages retained per conversation session. Default: 10.
    pub memory_capacity: usize,
    /// Messages projected into the prompt context. Default: 6.
    pub context_window: usize,

    /// How long completed realtime sessions stay queryable. Default: 10 min.
    pub tracker_retention: Duration,
    /// Per-subscriber outbound queue capacity. Default: 256.
    pub subscriber_queue_capacity: usize,
    /// Heartbeat cadence per subscriber. Default: 30 s.
    pub heartbeat_interval: Duration,
    /// Subscribers silent for this long are unsubscribed. Default: 90 s.
    pub subscriber_stale_after: Duration,

    /// In-flight scrape ceiling per coordinator instance. Default: 5.
    pub scrape_concurrency: usize,
    /// Bounded buffer between `record()` callers and the journal task.
    /// Default: 1024 records.
    pub journal_buffer: usize,

    /// Agent name used when no keyword matches. Default: `technical_support`.
    pub default_agent: String,
    /// Optional orchestrator agent prepended to every route.
    pub orchestrator_agent: Option<String>,
    /// Maximum agents returned by one routing decision. Default: 3.
    pub route_top_k: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(120),
            agent_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
            vector_timeout: Duration::from_secs(5),
            scrape_timeout: Duration::from_secs(15),
            pool_acquire_timeout: Duration::from_secs(3),
            cancel_grace: Duration::from_secs(2),
            max_parallel_agents: 3,
            max_tokens_out: 4096,
            retry_jitter_ms: 250,
            memory_capacity: 10,
            context_window: 6,
            tracker_retention: Duration::from_secs(600),
            subscriber_queue_capacity: 256,
            heartbeat_interval: Duration::from_secs(30),
            subscriber_stale_after: Duration::from_secs(90),
            scrape_concurrency: 5,
            journal_buffer: 1024,
            default_agent: String::from("technical_support"),
            orchestrator_agent: None,
            route_top_k: 3,
        }
    }
}
