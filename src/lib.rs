// src/lib.rs

// Import the top-level `agentmesh` module.
pub mod agentmesh;

// Re-export the component modules at the crate root so callers write
// `agentmesh::router::AgentRouter` instead of navigating the full hierarchy.
pub use agentmesh::{
    agent, clock, config, conversation, coordinator, error, http_client_pool, knowledge, llm_pool,
    metrics, model_client, registry, router, tracker,
};

// Re-exporting key items for easier external access.
pub use agentmesh::agent::AgentDefinition;
pub use agentmesh::config::MeshConfig;
pub use agentmesh::conversation::ConversationMemory;
pub use agentmesh::coordinator::{ExecutionCoordinator, ExecutionOutcome, ExecutionRequest};
pub use agentmesh::error::{ErrorKind, MeshError};
pub use agentmesh::llm_pool::{CapabilityTier, LlmPool};
pub use agentmesh::metrics::MetricsStore;
pub use agentmesh::model_client::{ModelClient, ModelRequest, ModelResponse, Role, TokenUsage};
pub use agentmesh::registry::AgentRegistry;
pub use agentmesh::router::AgentRouter;
pub use agentmesh::tracker::RealtimeTracker;
