//! Agent definitions.
//!
//! An [`AgentDefinition`] is a *data record*, not a behavior: identity,
//! prompt material (role / goal / backstory), routing features (keywords and
//! a domain tag), execution config (preferred capability tier and tool list),
//! and scoring attributes. Polymorphism happens through the router's keyword
//! scoring and the LLM tier the agent requests — there is no agent class
//! hierarchy.
//!
//! Agents are owned by the [`AgentRegistry`](crate::AgentRegistry); every
//! other component references them by id only, so metrics and skills can
//! outlive deactivation (deactivation is soft, never a delete).
//!
//! # Example
//!
//! ```rust
//! use agentmesh::AgentDefinition;
//! use agentmesh::llm_pool::CapabilityTier;
//!
//! let agent = AgentDefinition::new("tech-1", "Technical Integration Specialist", "integration engineer")
//!     .with_goal("Resolve webhook, API, and integration issues precisely.")
//!     .with_backstory("Veteran of hundreds of production webhook debugging sessions.")
//!     .with_keywords(vec!["webhook".into(), "api".into(), "integration".into()])
//!     .with_domain("technical")
//!     .with_preferred_tier(CapabilityTier::Powerful)
//!     .with_specialization(0.9);
//!
//! assert!(agent.is_active);
//! assert_eq!(agent.specialization_score, 0.9);
//! ```

use crate::agentmesh::llm_pool::CapabilityTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling performance embedded in the agent record, refreshed from the
/// metrics store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// Interactions contributing to these averages.
    pub interactions: u64,
    /// Mean assessed answer quality in `[0, 1]`.
    pub avg_quality: f64,
    /// Mean end-to-end latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Fraction of interactions that succeeded.
    pub success_rate: f64,
}

/// A specialist agent: identity, prompt material, routing features, execution
/// config, and scoring attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Stable opaque identifier.
    pub id: String,
    /// Display name; unique among active agents.
    pub name: String,
    /// One-line role used at the top of the system prompt.
    pub role: String,
    /// What the agent is trying to achieve; embedded in prompts.
    pub goal: String,
    /// Persona background; embedded in prompts.
    pub backstory: String,
    /// Routing keywords matched against expanded query tokens.
    pub keywords: Vec<String>,
    /// Domain tag (e.g. `"technical"`, `"billing"`).
    pub domain: String,
    /// Capability tier this agent prefers.
    pub preferred_tier: CapabilityTier,
    /// Names of tools this agent may use. Agents with disjoint tool sets can
    /// run in parallel.
    pub tools: Vec<String>,
    /// Avatar hint for UI surfaces.
    pub avatar: Option<String>,
    /// Color hint for UI surfaces.
    pub color: Option<String>,
    /// How specialized the agent is, in `[0, 1]`. Slowly varying
    /// configuration; only registry updates change it.
    pub specialization_score: f64,
    /// How well the agent plays with others, in `[0, 1]`.
    pub collaboration_score: f64,
    /// Deactivated agents are hidden from routing but stay resolvable by id.
    pub is_active: bool,
    /// Rolling performance, refreshed from metrics.
    pub performance: PerformanceSummary,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl AgentDefinition {
    /// Create an active agent with the mandatory identity fields.
    ///
    /// Defaults: no keywords, `"general"` domain, balanced tier, scores 0.5.
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            goal: String::new(),
            backstory: String::new(),
            keywords: Vec::new(),
            domain: String::from("general"),
            preferred_tier: CapabilityTier::Balanced,
            tools: Vec::new(),
            avatar: None,
            color: None,
            specialization_score: 0.5,
            collaboration_score: 0.5,
            is_active: true,
            performance: PerformanceSummary::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the goal text (builder pattern).
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    /// Set the backstory text (builder pattern).
    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = backstory.into();
        self
    }

    /// Set the routing keywords (builder pattern). Keywords are lowercased.
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords.into_iter().map(|k| k.to_lowercase()).collect();
        self
    }

    /// Set the domain tag (builder pattern).
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Set the preferred capability tier (builder pattern).
    pub fn with_preferred_tier(mut self, tier: CapabilityTier) -> Self {
        self.preferred_tier = tier;
        self
    }

    /// Set the tool list (builder pattern).
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the specialization score, clamped to `[0, 1]` (builder pattern).
    pub fn with_specialization(mut self, score: f64) -> Self {
        self.specialization_score = score.clamp(0.0, 1.0);
        self
    }

    /// Set the collaboration score, clamped to `[0, 1]` (builder pattern).
    pub fn with_collaboration(mut self, score: f64) -> Self {
        self.collaboration_score = score.clamp(0.0, 1.0);
        self
    }

    /// Assemble this agent's system prompt from role, goal, and backstory.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}, {}.\n", self.name, self.role);
        if !self.goal.is_empty() {
            prompt.push_str(&format!("Your goal: {}\n", self.goal));
        }
        if !self.backstory.is_empty() {
            prompt.push_str(&format!("Background: {}\n", self.backstory));
        }
        prompt
    }

    /// Whether this agent's tool set is disjoint from `other`'s. Disjoint
    /// agents are safe to execute in parallel.
    pub fn tools_disjoint_from(&self, other: &AgentDefinition) -> bool {
        self.tools.iter().all(|t| !other.tools.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_scores() {
        let agent = AgentDefinition::new("a", "A", "tester")
            .with_specialization(1.7)
            .with_collaboration(-0.3);
        assert_eq!(agent.specialization_score, 1.0);
        assert_eq!(agent.collaboration_score, 0.0);
    }

    #[test]
    fn test_keywords_are_lowercased() {
        let agent =
            AgentDefinition::new("a", "A", "tester").with_keywords(vec!["Webhook".into(), "API".into()]);
        assert_eq!(agent.keywords, vec!["webhook", "api"]);
    }

    #[test]
    fn test_system_prompt_includes_identity() {
        let agent = AgentDefinition::new("a", "Billing Expert", "billing specialist")
            .with_goal("Resolve invoices")
            .with_backstory("Years of billing disputes");
        let prompt = agent.system_prompt();
        assert!(prompt.contains("You are Billing Expert, billing specialist."));
        assert!(prompt.contains("Your goal: Resolve invoices"));
        assert!(prompt.contains("Background: Years of billing disputes"));
    }

    #[test]
    fn test_tool_disjointness() {
        let a = AgentDefinition::new("a", "A", "r").with_tools(vec!["search".into()]);
        let b = AgentDefinition::new("b", "B", "r").with_tools(vec!["scrape".into()]);
        let c = AgentDefinition::new("c", "C", "r").with_tools(vec!["search".into(), "math".into()]);
        assert!(a.tools_disjoint_from(&b));
        assert!(!a.tools_disjoint_from(&c));
    }
}
